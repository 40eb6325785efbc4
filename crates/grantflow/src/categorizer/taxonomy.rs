//! Built-in industry taxonomy.

use crate::categorizer::ClassificationRule;
use crate::config::schema::{MatchCondition, RuleTier};
use crate::program::IndustryCategory;

use IndustryCategory::*;

/// `(category, keywords, latin acronyms)`.
type KeywordSet = (IndustryCategory, &'static [&'static str], &'static [&'static str]);

/// Narrow technical terms that pin an announcement to one industry.
const SPECIFIC: &[KeywordSet] = &[
    (
        Energy,
        &[
            "원자력",
            "원전",
            "핵융합",
            "소형모듈원자로",
            "방사성폐기물",
            "수소",
            "연료전지",
            "이차전지",
            "태양광",
            "풍력",
            "에너지저장",
        ],
        &["SMR", "ESS"],
    ),
    (
        Ict,
        &[
            "인공지능",
            "반도체",
            "팹리스",
            "빅데이터",
            "클라우드",
            "메타버스",
            "사이버보안",
            "정보보호",
            "양자기술",
            "양자컴퓨팅",
            "블록체인",
            "디스플레이",
        ],
        &["AI", "SW", "IoT"],
    ),
    (
        BioHealth,
        &[
            "바이오",
            "신약",
            "의료기기",
            "제약산업",
            "의약품",
            "디지털헬스",
            "유전체",
            "백신",
            "임상시험",
            "재생의료",
        ],
        &[],
    ),
    (
        Environment,
        &[
            "탄소중립",
            "온실가스",
            "미세먼지",
            "자원순환",
            "수처리",
            "탄소포집",
            "폐플라스틱",
        ],
        &[],
    ),
    (
        Manufacturing,
        &[
            "스마트공장",
            "스마트제조",
            "뿌리기술",
            "소재부품장비",
            "소부장",
            "로봇",
            "금형",
            "공작기계",
        ],
        &[],
    ),
    (
        Agriculture,
        &["스마트팜", "농식품", "축산", "종자", "푸드테크", "작물"],
        &[],
    ),
    (Marine, &["수산", "조선해양", "항만", "해운", "선박"], &[]),
    (
        Defense,
        &["방위산업", "방산", "무기체계", "국방기술", "군수"],
        &[],
    ),
    (
        Construction,
        &["스마트시티", "건설기술", "스마트건설", "모듈러"],
        &[],
    ),
    (
        Transportation,
        &["자율주행", "전기차", "미래차", "모빌리티", "드론", "철도차량", "도심항공"],
        &["UAM"],
    ),
    (Culture, &["콘텐츠", "게임", "웹툰", "관광", "이스포츠"], &[]),
];

/// Broad sector words; weaker evidence than [`SPECIFIC`].
const GENERIC: &[KeywordSet] = &[
    (Energy, &["에너지", "전력", "발전소"], &[]),
    (
        Ict,
        &["정보통신", "디지털", "소프트웨어", "데이터", "플랫폼"],
        &["ICT"],
    ),
    (BioHealth, &["의료", "헬스케어", "건강", "보건"], &[]),
    (Environment, &["환경", "기후", "폐기물", "녹색"], &[]),
    (Manufacturing, &["제조", "부품", "장비", "공정"], &[]),
    (Agriculture, &["농업", "농촌", "식품", "산림"], &[]),
    (Marine, &["해양", "어업"], &[]),
    (Defense, &["국방", "안보"], &[]),
    (Construction, &["건설", "건축", "국토", "인프라"], &[]),
    (Transportation, &["교통", "자동차", "항공", "물류"], &[]),
    (Culture, &["문화", "예술", "스포츠", "미디어"], &[]),
];

/// Specialised funding agencies whose programs sit in one industry.
const AGENCIES: &[KeywordSet] = &[
    (
        Ict,
        &[
            "정보통신기획평가원",
            "한국지능정보사회진흥원",
            "정보통신산업진흥원",
            "한국인터넷진흥원",
        ],
        &["IITP", "NIA", "NIPA", "KISA"],
    ),
    (
        Energy,
        &[
            "한국에너지기술평가원",
            "한국원자력연구원",
            "한국에너지공단",
            "한국수력원자력",
        ],
        &["KETEP"],
    ),
    (
        BioHealth,
        &["한국보건산업진흥원", "국가신약개발사업단"],
        &["KHIDI"],
    ),
    (Environment, &["한국환경산업기술원"], &["KEITI"]),
    (
        Manufacturing,
        &["한국산업기술기획평가원", "한국산업기술진흥원"],
        &["KEIT", "KIAT"],
    ),
    (Agriculture, &["농림식품기술기획평가원", "농촌진흥청"], &["IPET"]),
    (Marine, &["해양수산과학기술진흥원"], &["KIMST"]),
    (
        Defense,
        &["국방기술진흥연구소", "방위사업청", "국방과학연구소"],
        &[],
    ),
    (Construction, &["국토교통과학기술진흥원"], &["KAIA"]),
    (Transportation, &["한국교통안전공단", "한국철도기술연구원"], &[]),
    (Culture, &["한국콘텐츠진흥원"], &["KOCCA"]),
];

/// Ministries whose programs default to one industry when nothing more
/// specific matched.
const MINISTRIES: &[KeywordSet] = &[
    (Ict, &["과학기술정보통신부", "과기정통부"], &[]),
    (Manufacturing, &["산업통상자원부", "산업부"], &[]),
    (BioHealth, &["보건복지부", "식품의약품안전처"], &[]),
    (Environment, &["환경부"], &[]),
    (Agriculture, &["농림축산식품부"], &[]),
    (Marine, &["해양수산부"], &[]),
    (Defense, &["국방부"], &[]),
    (Construction, &["국토교통부"], &[]),
    (Culture, &["문화체육관광부"], &[]),
];

/// ASCII word boundaries, so `AI` matches in `AI기반` but not in `FAIR`.
pub fn acronym_pattern(acronyms: &[&str]) -> String {
    format!(r"(?-u:\b)({})(?-u:\b)", acronyms.join("|"))
}

fn keyword_condition(keywords: &[&str], acronyms: &[&str]) -> MatchCondition {
    match (keywords.is_empty(), acronyms.is_empty()) {
        (_, true) => MatchCondition::contains_any(keywords),
        (true, false) => MatchCondition::pattern(&acronym_pattern(acronyms)),
        (false, false) => MatchCondition::any(vec![
            MatchCondition::contains_any(keywords),
            MatchCondition::pattern(&acronym_pattern(acronyms)),
        ]),
    }
}

fn tier_rules(prefix: &str, tier: RuleTier, sets: &[KeywordSet]) -> Vec<ClassificationRule> {
    sets.iter()
        .map(|(category, keywords, acronyms)| {
            ClassificationRule::new(
                format!("{}.{}", prefix, category.as_str().to_lowercase()),
                *category,
                tier,
                keyword_condition(keywords, acronyms),
            )
        })
        .collect()
}

/// Every built-in rule, highest tier first.
pub fn builtin_rules() -> Vec<ClassificationRule> {
    let mut rules = tier_rules("specific", RuleTier::Specific, SPECIFIC);
    rules.extend(tier_rules("agency", RuleTier::Agency, AGENCIES));
    rules.extend(tier_rules("generic", RuleTier::Generic, GENERIC));
    rules.extend(tier_rules("ministry", RuleTier::MinistryDefault, MINISTRIES));
    rules
}
