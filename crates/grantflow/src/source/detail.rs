//! Announcement detail page parsing.
//!
//! Portals lay their detail pages out as label/value tables (`th`/`td` rows
//! or `dt`/`dd` lists) followed by a free-text body and a file list. Labels
//! are matched after removing whitespace, so `소관 부처` and `소관부처` are
//! the same field.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::SourceError;
use crate::sanitize::{redact_url, url_filename};
use crate::worker::job::{Attachment, DetailPageData};

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {}: {}", css, e))
}

static ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| selector("th, td"));
static DEFINITION_LIST: LazyLock<Selector> = LazyLock::new(|| selector("dl"));
static TERM: LazyLock<Selector> = LazyLock::new(|| selector("dt, dd"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));

const TITLE_SELECTORS: &[&str] = &[
    ".view_title",
    ".view-title",
    ".tit_view",
    ".board_view .title",
    "h1",
    "h2",
    "h3",
    "title",
];

const CONTENT_SELECTORS: &[&str] = &[
    ".view_cont",
    ".view-content",
    ".board_view .content",
    "#content",
    "article",
    "main",
    "body",
];

static FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.+?\.(?:hwpx|hwp|pdf|docx|doc|xlsx|xls|pptx|ppt|zip|txt))(?:$|[^A-Za-z0-9])")
        .expect("valid filename regex")
});

const DOWNLOAD_MARKERS: &[&str] = &["download", "filedown", "atchfile", "getfile"];

#[derive(Debug, Default)]
struct Labeled {
    title: Option<String>,
    ministry: Option<String>,
    agency: Option<String>,
    description: Option<String>,
}

impl Labeled {
    fn assign(&mut self, label: &str, value: String) {
        if value.is_empty() {
            return;
        }
        let label: String = label.chars().filter(|c| !c.is_whitespace()).collect();
        let slot = match label.as_str() {
            "공고명" | "사업명" | "제목" => &mut self.title,
            "전문기관" | "전담기관" | "공고기관" | "수행기관" | "사업수행기관" | "담당기관" => {
                &mut self.agency
            }
            "공고내용" | "사업개요" | "내용" => &mut self.description,
            l if l.contains("부처") => &mut self.ministry,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }
}

/// Text content of an element with script and style bodies left out, one
/// line per text node.
fn visible_text(element: ElementRef<'_>) -> String {
    element
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
            (!hidden).then(|| text.trim())
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn inline_text(element: ElementRef<'_>) -> String {
    visible_text(element)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn collect_labeled(document: &Html) -> Labeled {
    let mut labeled = Labeled::default();

    for row in document.select(&ROW) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
        for pair in cells.windows(2) {
            if pair[0].value().name() == "th" && pair[1].value().name() == "td" {
                labeled.assign(&inline_text(pair[0]), visible_text(pair[1]));
            }
        }
    }

    for list in document.select(&DEFINITION_LIST) {
        let terms: Vec<ElementRef<'_>> = list.select(&TERM).collect();
        for pair in terms.windows(2) {
            if pair[0].value().name() == "dt" && pair[1].value().name() == "dd" {
                labeled.assign(&inline_text(pair[0]), visible_text(pair[1]));
            }
        }
    }

    labeled
}

fn first_text(document: &Html, candidates: &[&str], inline: bool) -> Option<String> {
    candidates.iter().find_map(|css| {
        let sel = Selector::parse(css).ok()?;
        document
            .select(&sel)
            .map(|el| if inline { inline_text(el) } else { visible_text(el) })
            .find(|text| !text.is_empty())
    })
}

fn attachment_filename(link: ElementRef<'_>, url: &str) -> Option<String> {
    let text = inline_text(link);
    let title = link.value().attr("title").unwrap_or("").trim().to_string();
    let path_name = url_filename(url).unwrap_or_default();

    let found = [text.as_str(), title.as_str(), path_name.as_str()]
        .into_iter()
        .find_map(|candidate| FILENAME.captures(candidate).map(|c| c[1].trim().to_string()));
    found
}

fn is_download_link(href: &str) -> bool {
    let lower = href.to_lowercase();
    DOWNLOAD_MARKERS.iter().any(|m| lower.contains(m))
}

fn collect_attachments(document: &Html, base: &reqwest::Url) -> Vec<Attachment> {
    let mut seen = HashSet::new();
    let mut attachments = Vec::new();

    for link in document.select(&LINK) {
        let Some(href) = link.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        let Ok(url) = base.join(href) else {
            continue;
        };
        let url = url.to_string();

        let filename = match attachment_filename(link, &url) {
            Some(name) => name,
            None if is_download_link(href) => {
                let text = inline_text(link);
                if text.is_empty() {
                    format!("attachment-{}", attachments.len() + 1)
                } else {
                    text
                }
            }
            None => continue,
        };

        if seen.insert(url.clone()) {
            attachments.push(Attachment::new(url, filename));
        }
    }

    attachments
}

/// Parses an announcement detail page. Relative attachment links are
/// resolved against `base_url`.
pub fn parse_detail_page(html: &str, base_url: &str) -> Result<DetailPageData, SourceError> {
    let base = reqwest::Url::parse(base_url).map_err(|e| SourceError::InvalidUrl {
        url: redact_url(base_url),
        reason: e.to_string(),
    })?;
    let document = Html::parse_document(html);
    let labeled = collect_labeled(&document);

    let title = labeled
        .title
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .or_else(|| first_text(&document, TITLE_SELECTORS, true))
        .ok_or_else(|| SourceError::Parse {
            url: redact_url(base_url),
            reason: "no announcement title found".to_string(),
        })?;

    let description = labeled
        .description
        .or_else(|| first_text(&document, CONTENT_SELECTORS, false))
        .unwrap_or_default();

    let attachments = collect_attachments(&document, &base);

    tracing::debug!(
        title = %title,
        attachments = attachments.len(),
        "Parsed detail page"
    );

    Ok(DetailPageData {
        title,
        ministry: labeled.ministry.map(|m| inline_single_line(&m)),
        agency: labeled.agency.map(|a| inline_single_line(&a)),
        description,
        attachments,
    })
}

fn inline_single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
