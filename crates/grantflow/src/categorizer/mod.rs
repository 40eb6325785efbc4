//! Industry and regional classification of announcements.
//!
//! The industry pass walks an ordered list of [`ClassificationRule`]s. Rules
//! are grouped by priority and the first priority level where anything
//! matches decides the category; lower levels are never consulted. Within
//! that level the category backed by the most distinct keywords wins, ties
//! going to the earlier rule.
//!
//! The regional pass runs independently and never changes the category.

pub mod confidence;
pub mod matcher;
pub mod regional;
pub mod taxonomy;

use crate::config::schema::{ClassificationConfig, MatchCondition, RuleConfig, RuleScope, RuleTier};
use crate::error::ConfigError;
use crate::program::{Confidence, IndustryCategory};
use crate::worker::job::DetailPageData;

pub use confidence::{eligibility_confidence, eligibility_points};
pub use matcher::RuleMatcher;

#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub id: String,
    pub category: IndustryCategory,
    pub priority: i32,
    pub tier: RuleTier,
    pub scope: RuleScope,
    pub match_condition: MatchCondition,
}

impl ClassificationRule {
    /// A rule with its tier's default priority and scope.
    pub fn new(
        id: impl Into<String>,
        category: IndustryCategory,
        tier: RuleTier,
        match_condition: MatchCondition,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            priority: tier.default_priority(),
            tier,
            scope: tier.default_scope(),
            match_condition,
        }
    }

    pub fn from_config(rule: &RuleConfig) -> Result<Self, ConfigError> {
        let category = rule
            .category
            .parse::<IndustryCategory>()
            .map_err(|reason| ConfigError::InvalidRule {
                id: rule.id.clone(),
                reason,
            })?;

        Ok(Self {
            id: rule.id.clone(),
            category,
            priority: rule.priority.unwrap_or_else(|| rule.tier.default_priority()),
            tier: rule.tier,
            scope: rule.scope.unwrap_or_else(|| rule.tier.default_scope()),
            match_condition: rule.match_condition.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: IndustryCategory,
    pub confidence: Confidence,
    /// Keywords behind the decision, in rule order.
    pub matched_keywords: Vec<String>,
    /// First rule of the winning category, `None` for the GENERAL fallback.
    pub rule_id: Option<String>,
    pub tier: Option<RuleTier>,
    pub requires_regional_filter: bool,
    pub regional_keywords: Vec<String>,
}

impl Classification {
    /// Fallback when no rule matched.
    pub fn general() -> Self {
        Self {
            category: IndustryCategory::General,
            confidence: Confidence::Low,
            matched_keywords: Vec::new(),
            rule_id: None,
            tier: None,
            requires_regional_filter: false,
            regional_keywords: Vec::new(),
        }
    }
}

/// Text views a rule can look at.
struct Scopes {
    title: String,
    content: String,
    agency: String,
}

impl Scopes {
    fn from_detail(detail: &DetailPageData) -> Self {
        let ministry = detail.ministry.as_deref().unwrap_or_default();
        let agency = detail.agency.as_deref().unwrap_or_default();
        Self {
            title: detail.title.clone(),
            content: format!("{}\n{}", detail.title, detail.description),
            agency: format!("{}\n{}", ministry, agency),
        }
    }

    fn text(&self, scope: RuleScope) -> &str {
        match scope {
            RuleScope::Content => &self.content,
            RuleScope::Agency => &self.agency,
        }
    }
}

/// Category candidate within one priority level.
struct Candidate<'a> {
    category: IndustryCategory,
    first_rule: &'a ClassificationRule,
    keywords: Vec<String>,
}

pub struct Classifier {
    rules: Vec<ClassificationRule>,
    matcher: RuleMatcher,
}

impl Classifier {
    /// Built-in taxonomy plus `custom` rules. Custom rules sort ahead of
    /// built-in rules of equal priority.
    pub fn new(custom: Vec<ClassificationRule>) -> Self {
        let mut rules = custom;
        rules.extend(taxonomy::builtin_rules());
        Self::with_rules(rules)
    }

    /// Exactly these rules, sorted by descending priority (stable).
    pub fn with_rules(mut rules: Vec<ClassificationRule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        let matcher = RuleMatcher::new(rules.iter().map(|r| &r.match_condition));
        Self { rules, matcher }
    }

    pub fn from_config(config: &ClassificationConfig) -> Result<Self, ConfigError> {
        let custom = config
            .rules
            .iter()
            .map(ClassificationRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(custom))
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn classify(&self, detail: &DetailPageData) -> Classification {
        let _span = tracing::debug_span!("classify", title = %detail.title).entered();
        let scopes = Scopes::from_detail(detail);

        let regional_keywords = regional::regional_markers(&scopes.content);
        let mut classification = self.classify_industry(&scopes);
        classification.requires_regional_filter = !regional_keywords.is_empty();
        classification.regional_keywords = regional_keywords;

        tracing::debug!(
            category = %classification.category,
            confidence = classification.confidence.as_str(),
            rule = ?classification.rule_id,
            regional = classification.requires_regional_filter,
            "Classified announcement"
        );
        classification
    }

    fn classify_industry(&self, scopes: &Scopes) -> Classification {
        let mut level_start = 0;
        while level_start < self.rules.len() {
            let priority = self.rules[level_start].priority;
            let level_end = self.rules[level_start..]
                .iter()
                .position(|r| r.priority != priority)
                .map_or(self.rules.len(), |offset| level_start + offset);

            if let Some(winner) = self.best_candidate(&self.rules[level_start..level_end], scopes) {
                return self.finish(winner, scopes);
            }
            level_start = level_end;
        }

        Classification::general()
    }

    fn best_candidate<'a>(
        &self,
        level: &'a [ClassificationRule],
        scopes: &Scopes,
    ) -> Option<Candidate<'a>> {
        let mut candidates: Vec<Candidate<'a>> = Vec::new();

        for rule in level {
            let Some(keywords) = self
                .matcher
                .matched_terms(&rule.match_condition, scopes.text(rule.scope))
            else {
                continue;
            };

            match candidates.iter_mut().find(|c| c.category == rule.category) {
                Some(candidate) => {
                    for keyword in keywords {
                        if !candidate.keywords.contains(&keyword) {
                            candidate.keywords.push(keyword);
                        }
                    }
                }
                None => candidates.push(Candidate {
                    category: rule.category,
                    first_rule: rule,
                    keywords,
                }),
            }
        }

        // Earliest candidate wins ties, so keep the first maximum.
        let mut best: Option<Candidate<'a>> = None;
        for candidate in candidates {
            let better = match &best {
                Some(current) => candidate.keywords.len() > current.keywords.len(),
                None => true,
            };
            if better {
                best = Some(candidate);
            }
        }
        best
    }

    /// Keywords of the same category found by content-scoped rules.
    fn corroborating_keywords(&self, category: IndustryCategory, scopes: &Scopes) -> Vec<String> {
        let mut keywords = Vec::new();
        for rule in &self.rules {
            if rule.category != category || rule.scope != RuleScope::Content {
                continue;
            }
            if let Some(found) = self
                .matcher
                .matched_terms(&rule.match_condition, &scopes.content)
            {
                for keyword in found {
                    if !keywords.contains(&keyword) {
                        keywords.push(keyword);
                    }
                }
            }
        }
        keywords
    }

    fn finish(&self, winner: Candidate<'_>, scopes: &Scopes) -> Classification {
        let tier = winner.first_rule.tier;
        let mut keywords = winner.keywords;

        let confidence = match tier {
            RuleTier::Specific => {
                let title_hit = keywords.iter().any(|k| scopes.title.contains(k.as_str()));
                if title_hit || keywords.len() >= 2 {
                    Confidence::High
                } else {
                    Confidence::Medium
                }
            }
            RuleTier::Agency => {
                let corroboration = self.corroborating_keywords(winner.category, scopes);
                if corroboration.is_empty() {
                    Confidence::Medium
                } else {
                    for keyword in corroboration {
                        if !keywords.contains(&keyword) {
                            keywords.push(keyword);
                        }
                    }
                    Confidence::High
                }
            }
            RuleTier::Generic => {
                if keywords.len() >= 2 {
                    Confidence::Medium
                } else {
                    Confidence::Low
                }
            }
            RuleTier::MinistryDefault => Confidence::Low,
        };

        Classification {
            category: winner.category,
            confidence,
            matched_keywords: keywords,
            rule_id: Some(winner.first_rule.id.clone()),
            tier: Some(tier),
            requires_regional_filter: false,
            regional_keywords: Vec::new(),
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(title: &str, description: &str, ministry: Option<&str>, agency: Option<&str>) -> DetailPageData {
        DetailPageData {
            title: title.to_string(),
            ministry: ministry.map(str::to_string),
            agency: agency.map(str::to_string),
            description: description.to_string(),
            attachments: vec![],
        }
    }

    #[test]
    fn test_specific_keyword_in_title_is_high() {
        let c = Classifier::default().classify(&detail(
            "2024년 소형모듈원자로(SMR) 핵심기술개발사업",
            "",
            None,
            None,
        ));
        assert_eq!(c.category, IndustryCategory::Energy);
        assert_eq!(c.confidence, Confidence::High);
        assert_eq!(c.tier, Some(RuleTier::Specific));
        assert!(c.matched_keywords.contains(&"소형모듈원자로".to_string()));
        assert!(c.matched_keywords.contains(&"SMR".to_string()));
    }

    #[test]
    fn test_single_specific_keyword_in_description_is_medium() {
        let c = Classifier::default().classify(&detail(
            "2024년 기술개발사업 공고",
            "과제 예시: 신약 후보물질 발굴",
            None,
            None,
        ));
        assert_eq!(c.category, IndustryCategory::BioHealth);
        assert_eq!(c.confidence, Confidence::Medium);
    }

    #[test]
    fn test_specific_beats_generic_and_agency() {
        let c = Classifier::default().classify(&detail(
            "디지털 플랫폼 기반 수소 연료전지 실증",
            "",
            Some("과학기술정보통신부"),
            Some("정보통신기획평가원"),
        ));
        assert_eq!(c.category, IndustryCategory::Energy);
        assert_eq!(c.tier, Some(RuleTier::Specific));
    }

    #[test]
    fn test_agency_with_corroboration_is_high() {
        let c = Classifier::default().classify(&detail(
            "2024년 정보통신방송 기술개발사업",
            "디지털 전환 과제",
            Some("과학기술정보통신부"),
            Some("정보통신기획평가원"),
        ));
        assert_eq!(c.category, IndustryCategory::Ict);
        assert_eq!(c.tier, Some(RuleTier::Agency));
        assert_eq!(c.confidence, Confidence::High);
        assert!(c.matched_keywords.contains(&"디지털".to_string()));
    }

    #[test]
    fn test_agency_without_corroboration_is_medium() {
        let c = Classifier::default().classify(&detail(
            "2024년 신규과제 공고",
            "",
            None,
            Some("한국에너지기술평가원"),
        ));
        assert_eq!(c.category, IndustryCategory::Energy);
        assert_eq!(c.confidence, Confidence::Medium);
    }

    #[test]
    fn test_generic_keyword_confidence() {
        let one = Classifier::default().classify(&detail("농업 분야 지원", "", None, None));
        assert_eq!(one.category, IndustryCategory::Agriculture);
        assert_eq!(one.confidence, Confidence::Low);

        let two = Classifier::default().classify(&detail("농업 및 농촌 지원", "", None, None));
        assert_eq!(two.confidence, Confidence::Medium);
    }

    #[test]
    fn test_everyday_words_are_not_specific_keywords() {
        let c = Classifier::default().classify(&detail(
            "2024년 국제공동연구 지원사업",
            "양자 협력 기반 과제, 참여기업의 제약 조건 없음",
            None,
            None,
        ));
        assert_eq!(c.category, IndustryCategory::General);
        assert!(c.matched_keywords.is_empty());

        let quantum = Classifier::default().classify(&detail("양자컴퓨팅 핵심기술 개발", "", None, None));
        assert_eq!(quantum.category, IndustryCategory::Ict);
        assert_eq!(quantum.tier, Some(RuleTier::Specific));

        let pharma = Classifier::default().classify(&detail("", "완제 의약품 제조공정 고도화", None, None));
        assert_eq!(pharma.category, IndustryCategory::BioHealth);
    }

    #[test]
    fn test_ministry_default_is_low() {
        let c = Classifier::default().classify(&detail(
            "2024년 신규과제 공고",
            "",
            Some("해양수산부"),
            None,
        ));
        assert_eq!(c.category, IndustryCategory::Marine);
        assert_eq!(c.confidence, Confidence::Low);
        assert_eq!(c.tier, Some(RuleTier::MinistryDefault));
    }

    #[test]
    fn test_no_match_is_general() {
        let c = Classifier::default().classify(&detail("2024년 공모 안내", "", None, None));
        assert_eq!(c.category, IndustryCategory::General);
        assert_eq!(c.confidence, Confidence::Low);
        assert!(c.matched_keywords.is_empty());
        assert!(c.rule_id.is_none());
    }

    #[test]
    fn test_more_keywords_win_within_level() {
        let c = Classifier::default().classify(&detail(
            "",
            "반도체 공정 고도화와 신약, 인공지능 활용",
            None,
            None,
        ));
        assert_eq!(c.category, IndustryCategory::Ict);
    }

    #[test]
    fn test_tie_goes_to_earlier_rule() {
        let rules = vec![
            ClassificationRule::new("first", IndustryCategory::Culture, RuleTier::Specific, MatchCondition::contains_any(&["게임"])),
            ClassificationRule::new("second", IndustryCategory::Ict, RuleTier::Specific, MatchCondition::contains_any(&["엔진"])),
        ];
        let c = Classifier::with_rules(rules).classify(&detail("게임 엔진", "", None, None));
        assert_eq!(c.category, IndustryCategory::Culture);
        assert_eq!(c.rule_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_custom_rule_overrides_builtin() {
        let config: ClassificationConfig = serde_json::from_str(
            r#"{"rules": [{"id": "hydrogen-mobility", "category": "TRANSPORTATION", "priority": 200, "match": {"contains": "수소"}}]}"#,
        )
        .unwrap();
        let classifier = Classifier::from_config(&config).unwrap();

        let c = classifier.classify(&detail("수소 연료전지 실증", "", None, None));
        assert_eq!(c.category, IndustryCategory::Transportation);
        assert_eq!(c.rule_id.as_deref(), Some("hydrogen-mobility"));
    }

    #[test]
    fn test_regional_flag_is_independent_of_category() {
        let c = Classifier::default().classify(&detail(
            "2024년 지역특화 수소 연료전지 실증",
            "신청자격: 전라북도 소재 중소기업",
            None,
            None,
        ));
        assert_eq!(c.category, IndustryCategory::Energy);
        assert!(c.requires_regional_filter);
        assert_eq!(
            c.regional_keywords,
            vec!["지역특화".to_string(), "전라북도 소재 중소기업".to_string()]
        );

        let plain = Classifier::default().classify(&detail("수소 연료전지 실증", "", None, None));
        assert_eq!(plain.category, IndustryCategory::Energy);
        assert!(!plain.requires_regional_filter);
        assert!(plain.regional_keywords.is_empty());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let d = detail("AI 반도체 설계", "팹리스 지원", Some("과학기술정보통신부"), None);
        let classifier = Classifier::default();
        assert_eq!(classifier.classify(&d), classifier.classify(&d));
    }
}
