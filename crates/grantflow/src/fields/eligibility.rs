//! Business structure and certification requirements.

use std::sync::LazyLock;

use regex::Regex;

use crate::program::BusinessStructure;

/// Canonical order of the output follows this table.
static STRUCTURE_PATTERNS: LazyLock<Vec<(BusinessStructure, Regex)>> = LazyLock::new(|| {
    vec![
        (
            BusinessStructure::Corporation,
            Regex::new(r"주식회사|법인사업자|중소기업|중견기업|(?:^|[^비])영리법인|스타트업|창업기업").unwrap(),
        ),
        (
            BusinessStructure::SoleProprietor,
            Regex::new(r"개인사업자|개인기업|1인\s*창조기업|소상공인").unwrap(),
        ),
        (
            BusinessStructure::Cooperative,
            Regex::new(r"협동조합").unwrap(),
        ),
        (
            BusinessStructure::NonProfit,
            Regex::new(r"비영리법인|비영리단체|비영리\s*민간단체|사단법인|재단법인").unwrap(),
        ),
        (
            BusinessStructure::University,
            Regex::new(r"대학교|대학|산학협력단").unwrap(),
        ),
        (
            // Mentions of research institutes widen eligibility; they are never
            // read as an exclusive restriction.
            BusinessStructure::ResearchInstitute,
            Regex::new(r"연구기관|출연연|연구개발기관|국공립\s*연구소|정부출연연구소").unwrap(),
        ),
    ]
});

/// Canonical certification name and the phrases that indicate it.
const CERTIFICATIONS: &[(&str, &[&str])] = &[
    ("벤처기업", &["벤처기업", "벤처인증", "벤처확인"]),
    ("이노비즈", &["이노비즈", "INNO-BIZ", "Inno-Biz", "기술혁신형 중소기업", "기술혁신형중소기업"]),
    ("메인비즈", &["메인비즈", "MAIN-BIZ", "Main-Biz", "경영혁신형 중소기업", "경영혁신형중소기업"]),
    ("기업부설연구소", &["기업부설연구소", "기업부설 연구소"]),
    ("연구개발전담부서", &["연구개발전담부서", "연구개발 전담부서"]),
    ("여성기업", &["여성기업"]),
    ("장애인기업", &["장애인기업"]),
    ("사회적기업", &["사회적기업"]),
];

pub fn extract_business_structures(text: &str) -> Vec<BusinessStructure> {
    STRUCTURE_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(structure, _)| *structure)
        .collect()
}

pub fn extract_certifications(text: &str) -> Vec<String> {
    CERTIFICATIONS
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|p| text.contains(p)))
        .map(|(name, _)| name.to_string())
        .collect()
}
