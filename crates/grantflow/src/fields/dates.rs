//! Publication date and application deadline extraction.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;

use crate::fields::Extracted;

const PUBLISHED_LABELS: &[&str] = &["공고일", "게시일", "등록일"];
const DEADLINE_LABELS: &[&str] = &[
    "접수마감",
    "마감일",
    "신청기한",
    "제출기한",
    "접수기간",
    "신청기간",
];

/// How far past a label a date may appear.
const WINDOW_CHARS: usize = 80;

static FULL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d{4})\s*[.\-/]\s*(\d{1,2})\s*[.\-/]\s*(\d{1,2})|(\d{4})\s*년\s*(\d{1,2})\s*월\s*(\d{1,2})\s*일",
    )
    .unwrap()
});
static YEAR_MONTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})\s*년\s*(\d{1,2})\s*월").unwrap());
static SHORT_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,2})\s*[.\-/월]\s*(\d{1,2})").unwrap());
static RELATIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"공고일\s*(?:로)?부터\s*(\d{1,3})\s*일").unwrap());

fn make_date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let year: i32 = year.parse().ok()?;
    if !(2000..=2100).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Text following each occurrence of any label, in order of appearance.
///
/// A window starts at the first non-blank character after the label and
/// ends at the next line break, so later schedule rows are not read as
/// part of the labelled value.
fn label_windows<'a>(text: &'a str, labels: &[&str]) -> Vec<&'a str> {
    let mut starts: Vec<usize> = labels
        .iter()
        .flat_map(|label| text.match_indices(label).map(|(i, s)| i + s.len()))
        .collect();
    starts.sort_unstable();
    starts.dedup();

    starts
        .into_iter()
        .map(|start| {
            let rest = text[start..].trim_start_matches(|c: char| c.is_whitespace() || c == ':');
            let line = rest.split('\n').next().unwrap_or_default();
            let end = line
                .char_indices()
                .nth(WINDOW_CHARS)
                .map(|(i, _)| i)
                .unwrap_or(line.len());
            &line[..end]
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct DateMatch {
    start: usize,
    end: usize,
    date: NaiveDate,
}

/// Every full date in the window, in order of appearance.
fn full_dates(window: &str) -> Vec<DateMatch> {
    FULL_DATE_RE
        .captures_iter(window)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let date = if caps.get(1).is_some() {
                make_date(&caps[1], &caps[2], &caps[3])
            } else {
                make_date(&caps[4], &caps[5], &caps[6])
            }?;
            Some(DateMatch {
                start: whole.start(),
                end: whole.end(),
                date,
            })
        })
        .collect()
}

/// The end of a `start ~ end` range opened by `first`. The end may omit
/// the year, as in `2024.03.18(월) ~ 04.15(월)`.
fn range_end(window: &str, first: &DateMatch, dates: &[DateMatch]) -> Option<NaiveDate> {
    let tail = &window[first.end..];
    let tilde = tail.find(['~', '～'])? + first.end;
    if dates.iter().any(|d| d.start > first.start && d.start < tilde) {
        return None;
    }

    let after = &window[tilde..];
    let after = &after[after.chars().next()?.len_utf8()..];
    if let Some(next) = dates.iter().find(|d| d.start >= tilde) {
        if window[tilde..next.start].chars().skip(1).all(char::is_whitespace) {
            return Some(next.date);
        }
    }
    let caps = SHORT_DATE_RE.captures(after)?;
    make_date(&first.date.year().to_string(), &caps[1], &caps[2])
}

fn year_month(window: &str) -> Option<(i32, u32)> {
    let caps = YEAR_MONTH_RE.captures(window)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    if !(2000..=2100).contains(&year) || !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

fn published_from_window(window: &str) -> Extracted<NaiveDate> {
    if let Some(first) = full_dates(window).first() {
        return Extracted::Exact(first.date);
    }
    match year_month(window).and_then(|(y, m)| NaiveDate::from_ymd_opt(y, m, 1)) {
        Some(date) => Extracted::Inferred(date),
        None => Extracted::NotFound,
    }
}

fn deadline_from_window(window: &str, published: Option<NaiveDate>) -> Extracted<NaiveDate> {
    let dates = full_dates(window);
    if let Some(first) = dates.first() {
        let date = range_end(window, first, &dates).unwrap_or(first.date);
        return Extracted::Exact(date);
    }
    if let Some(date) = year_month(window).and_then(|(y, m)| last_day_of_month(y, m)) {
        return Extracted::Inferred(date);
    }
    if let (Some(published), Some(caps)) = (published, RELATIVE_RE.captures(window)) {
        if let Ok(days) = caps[1].parse::<i64>() {
            return Extracted::Inferred(published + Duration::days(days));
        }
    }
    Extracted::NotFound
}

/// First exact result across windows, else the first inferred one.
fn best_of(results: impl Iterator<Item = Extracted<NaiveDate>>) -> Extracted<NaiveDate> {
    let mut fallback = Extracted::NotFound;
    for result in results {
        match result {
            Extracted::Exact(_) => return result,
            Extracted::Inferred(_) if !fallback.is_found() => fallback = result,
            _ => {}
        }
    }
    fallback
}

/// Returns `(published_at, deadline)`.
pub fn extract_dates(text: &str) -> (Extracted<NaiveDate>, Extracted<NaiveDate>) {
    let published = best_of(
        label_windows(text, PUBLISHED_LABELS)
            .into_iter()
            .map(published_from_window),
    );

    let anchor = published.value().copied();
    let deadline = best_of(
        label_windows(text, DEADLINE_LABELS)
            .into_iter()
            .map(|w| deadline_from_window(w, anchor)),
    );

    (published, deadline)
}
