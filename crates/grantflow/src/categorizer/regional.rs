//! Detection of region-restricted programs.

use std::sync::LazyLock;

use regex::Regex;

static REGIONAL_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"지역특화",
        r"지역주도",
        r"지역혁신",
        r"지역\s*벤처",
        r"로컬\s*크리에이터",
        r"지역전략산업",
        r"지역균형",
        r"지역거점",
        r"[가-힣]+(?:특별자치시|특별자치도|광역시|특별시|시|도|군)\s*소재\s*(?:중소)?기업",
        r"지역\s*(?:소재|기반)\s*(?:중소)?기업",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Regional marker phrases in order of first appearance. Overlapping hits
/// keep the earlier, longer one.
pub fn regional_markers(text: &str) -> Vec<String> {
    let mut hits: Vec<(usize, usize, &str)> = REGIONAL_MARKERS
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| (m.start(), m.end(), m.as_str())))
        .collect();
    hits.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut phrases: Vec<String> = Vec::new();
    let mut covered_until = 0;
    for (start, end, phrase) in hits {
        if start < covered_until {
            continue;
        }
        covered_until = end;
        let phrase = phrase.trim().to_string();
        if !phrases.contains(&phrase) {
            phrases.push(phrase);
        }
    }
    phrases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_in_order_of_appearance() {
        let text = "2024년 지역혁신 선도기업 육성사업 (지역특화산업 연계)";
        assert_eq!(
            regional_markers(text),
            vec!["지역혁신".to_string(), "지역특화".to_string()]
        );
    }

    #[test]
    fn test_located_in_region_phrases() {
        let cases = [
            ("신청자격: 부산광역시 소재 중소기업", "부산광역시 소재 중소기업"),
            ("경상남도 소재 기업에 한함", "경상남도 소재 기업"),
            ("지역 기반 기업 우대", "지역 기반 기업"),
            ("로컬 크리에이터 지원", "로컬 크리에이터"),
            ("지역벤처 육성", "지역벤처"),
        ];

        for (text, expected) in cases {
            assert_eq!(regional_markers(text), vec![expected.to_string()], "text: {}", text);
        }
    }

    #[test]
    fn test_repeated_marker_listed_once() {
        let text = "지역주도형 사업. 본 지역주도 과제는";
        assert_eq!(regional_markers(text), vec!["지역주도".to_string()]);
    }

    #[test]
    fn test_nationwide_program_has_no_markers() {
        assert!(regional_markers("전국 중소기업 대상 기술개발 지원").is_empty());
    }
}
