//! Technology readiness level (TRL) extraction.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::fields::Extracted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrlRange {
    pub min: Option<u8>,
    pub max: Option<u8>,
}

impl TrlRange {
    fn new(min: Option<u8>, max: Option<u8>) -> Self {
        match (min, max) {
            (Some(a), Some(b)) if a > b => Self {
                min: Some(b),
                max: Some(a),
            },
            _ => Self { min, max },
        }
    }
}

/// `TRL`, `기술성숙도(TRL)`, `기술준비수준 단계:` and similar lead-ins.
const LABEL: &str = r"(?:TRL|기술성숙도|기술준비수준)(?:\s*\(\s*TRL\s*\))?[\s:：)]*(?:단계)?[\s:：]*";

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i){LABEL}(\d{{1,2}})\s*(?:단계)?\s*(?:~|〜|-|–|부터)\s*(?:TRL\s*)?(\d{{1,2}})"
    ))
    .unwrap()
});
static AT_LEAST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i){LABEL}(\d{{1,2}})\s*(?:단계)?\s*이상")).unwrap());
static AT_MOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i){LABEL}(\d{{1,2}})\s*(?:단계)?\s*이하")).unwrap());
static SINGLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i){LABEL}(\d{{1,2}})")).unwrap());

/// Words that make a generic stage term refer to the project stage.
const STAGE_CONTEXT: &str = r"\s*(?:단계|연구|과제|기술개발|기술)";

/// Development stage patterns and the TRL span they imply. Terms common in
/// boilerplate (`실증`, `사업화`, `상용화`) only count next to a stage word,
/// and `양산` only as `양산화` or a production stage so the city 양산시
/// does not match.
static STAGE_PATTERNS: LazyLock<Vec<(Regex, u8, u8)>> = LazyLock::new(|| {
    [
        (r"기초연구|원천기술|기초원천".to_string(), 1, 3),
        (r"응용연구".to_string(), 3, 5),
        (r"시제품|시작품|프로토타입|개발연구".to_string(), 4, 6),
        (format!(r"테스트베드|파일럿|실증{STAGE_CONTEXT}"), 6, 8),
        (
            format!(r"양산화|대량생산|양산\s*(?:단계|기술|체계)|(?:사업화|상용화){STAGE_CONTEXT}"),
            7,
            9,
        ),
    ]
    .into_iter()
    .map(|(pattern, lo, hi)| (Regex::new(&pattern).unwrap(), lo, hi))
    .collect()
});

fn level(s: &str) -> Option<u8> {
    s.parse::<u8>().ok().filter(|n| (1..=9).contains(n))
}

fn first_range(text: &str) -> Option<TrlRange> {
    RANGE_RE.captures_iter(text).find_map(|caps| {
        let a = level(&caps[1])?;
        let b = level(&caps[2])?;
        Some(TrlRange::new(Some(a), Some(b)))
    })
}

fn first_level(re: &Regex, text: &str) -> Option<u8> {
    re.captures_iter(text).find_map(|caps| level(&caps[1]))
}

fn explicit_trl(text: &str) -> Option<TrlRange> {
    if let Some(range) = first_range(text) {
        return Some(range);
    }

    let min = first_level(&AT_LEAST_RE, text);
    let max = first_level(&AT_MOST_RE, text);
    if min.is_some() || max.is_some() {
        return Some(TrlRange::new(min, max));
    }

    first_level(&SINGLE_RE, text).map(|n| TrlRange::new(Some(n), Some(n)))
}

fn inferred_trl(text: &str) -> Option<TrlRange> {
    let mut bounds: Option<(u8, u8)> = None;

    for (pattern, lo, hi) in STAGE_PATTERNS.iter() {
        if pattern.is_match(text) {
            bounds = Some(match bounds {
                Some((min, max)) => (min.min(*lo), max.max(*hi)),
                None => (*lo, *hi),
            });
        }
    }

    bounds.map(|(min, max)| TrlRange::new(Some(min), Some(max)))
}

/// Explicit TRL statements win; stage keywords only produce an inferred
/// range when no explicit level is present.
pub fn extract_trl(text: &str) -> Extracted<TrlRange> {
    if let Some(range) = explicit_trl(text) {
        return Extracted::Exact(range);
    }
    match inferred_trl(text) {
        Some(range) => Extracted::Inferred(range),
        None => Extracted::NotFound,
    }
}
