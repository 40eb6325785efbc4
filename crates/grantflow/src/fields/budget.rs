//! KRW budget extraction anchored on funding keywords.

use std::sync::LazyLock;

use regex::Regex;

use crate::fields::Extracted;

pub const DEFAULT_WINDOW_CHARS: usize = 80;

/// Anchor classes from strongest to weakest. Government contribution is
/// what applicants actually receive; total project cost includes the
/// applicant's own matching funds, so it only yields an inferred value.
const ANCHOR_CLASSES: &[(&[&str], bool)] = &[
    (&["정부출연금", "정부지원금", "국고보조금", "정부출연"], true),
    (&["지원금액", "지원규모", "지원한도", "지원예산", "지원금"], true),
    (&["총사업비", "총 사업비", "연구개발비", "사업비", "예산"], false),
];

/// A run of digits followed by one or more magnitude units: `5억`, `2천`,
/// `5백만`, `3,000만`.
const UNIT_TERM: &str = r"\d[\d,]*(?:\.\d+)?\s*[조억만천백십]+";

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?:{UNIT_TERM}\s*)+(?:\d[\d,]*\s*)?원|(?:{UNIT_TERM}\s*)+|\d[\d,]*(?:\.\d+)?\s*원"
    ))
    .expect("valid amount regex")
});

static TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*([조억만천백십]*)").expect("valid term regex")
});

#[derive(Debug, Clone, Copy)]
struct Amount {
    start: usize,
    end: usize,
    value: i64,
}

fn group_unit(unit: char) -> Option<f64> {
    match unit {
        '조' => Some(1_000_000_000_000f64),
        '억' => Some(100_000_000f64),
        '만' => Some(10_000f64),
        _ => None,
    }
}

fn sub_unit(unit: char) -> Option<f64> {
    match unit {
        '천' => Some(1_000f64),
        '백' => Some(100f64),
        '십' => Some(10f64),
        _ => None,
    }
}

/// Parses a KRW amount such as `1억2천5백만원`, `2천억원`, `1.5억원` or
/// `300,000,000원`.
///
/// Digits with 천/백/십 build a number below 10,000 that is collected into
/// the current group; 조/억/만 close the group and scale it.
pub fn parse_krw(expr: &str) -> Option<i64> {
    let mut total = 0f64;
    let mut group = 0f64;
    let mut matched = false;

    for caps in TERM_RE.captures_iter(expr) {
        let mut value: f64 = caps[1].replace(',', "").parse().ok()?;
        matched = true;

        for unit in caps[2].chars() {
            if let Some(scale) = sub_unit(unit) {
                value *= scale;
            } else if let Some(scale) = group_unit(unit) {
                total += (group + value) * scale;
                group = 0.0;
                value = 0.0;
            }
        }
        group += value;
    }
    total += group;

    if !matched || !total.is_finite() || total > i64::MAX as f64 {
        return None;
    }
    Some(total.round() as i64)
}

/// A bare magnitude such as `3천` is only money when it says 원 or is in
/// the 억/조 range; otherwise it is usually a head count.
fn is_money(expr: &str) -> bool {
    expr.trim_end().ends_with('원') || expr.contains(['억', '조'])
}

fn find_amounts(text: &str) -> Vec<Amount> {
    AMOUNT_RE
        .find_iter(text)
        .filter(|m| is_money(m.as_str()))
        .filter_map(|m| {
            parse_krw(m.as_str()).map(|value| Amount {
                start: m.start(),
                end: m.end(),
                value,
            })
        })
        .collect()
}

fn find_anchors(text: &str, keywords: &[&str]) -> Vec<(usize, usize)> {
    let mut anchors: Vec<(usize, usize)> = keywords
        .iter()
        .flat_map(|kw| text.match_indices(kw).map(|(i, s)| (i, i + s.len())))
        .collect();
    anchors.sort_unstable();
    anchors.dedup();
    anchors
}

/// Distance in characters between an anchor and an amount. Zero when they
/// overlap.
fn char_distance(text: &str, anchor: (usize, usize), amount: &Amount) -> usize {
    if amount.start >= anchor.1 {
        text[anchor.1..amount.start].chars().count()
    } else if amount.end <= anchor.0 {
        text[amount.end..anchor.0].chars().count()
    } else {
        0
    }
}

/// Finds the budget amount closest to the strongest anchor class that has
/// any amount within `window` characters.
pub fn extract_budget(text: &str, window: usize) -> Extracted<i64> {
    let amounts = find_amounts(text);
    if amounts.is_empty() {
        return Extracted::NotFound;
    }

    for (keywords, exact) in ANCHOR_CLASSES {
        let anchors = find_anchors(text, keywords);

        let best = amounts
            .iter()
            .filter_map(|amount| {
                anchors
                    .iter()
                    .map(|anchor| char_distance(text, *anchor, amount))
                    .min()
                    .filter(|d| *d <= window)
                    .map(|d| (d, amount))
            })
            .min_by_key(|(d, amount)| (*d, amount.start));

        if let Some((_, amount)) = best {
            return if *exact {
                Extracted::Exact(amount.value)
            } else {
                Extracted::Inferred(amount.value)
            };
        }
    }

    Extracted::NotFound
}
