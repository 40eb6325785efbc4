use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::{Config, MatchCondition, CONFIG_VERSION};
use crate::error::ConfigError;
use crate::program::IndustryCategory;
use crate::secrets::has_secret_source;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker.count == 0 || config.worker.batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "worker.count and worker.batch_size must be positive".to_string(),
        });
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "retry.max_attempts must be at least 1".to_string(),
        });
    }

    if config.retry.base_backoff_secs > config.retry.max_backoff_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "retry.base_backoff_secs ({}) exceeds retry.max_backoff_secs ({})",
                config.retry.base_backoff_secs, config.retry.max_backoff_secs
            ),
        });
    }

    if config.extraction.min_text_length == 0 {
        return Err(ConfigError::Validation {
            message: "extraction.min_text_length must be positive".to_string(),
        });
    }

    let conversion = &config.conversion;
    if conversion.enabled {
        if conversion.login_url.is_empty() || conversion.converter_url.is_empty() {
            return Err(ConfigError::Validation {
                message: "conversion.login_url and conversion.converter_url are required when conversion is enabled".to_string(),
            });
        }
        if !has_secret_source(
            conversion.password.as_deref(),
            conversion.password_file.as_deref(),
            conversion.password_env.as_deref(),
        ) {
            return Err(ConfigError::Validation {
                message: "conversion requires one of password, password_file or password_env"
                    .to_string(),
            });
        }
    }

    let mut rule_ids = HashSet::new();
    for rule in &config.classification.rules {
        if !rule_ids.insert(&rule.id) {
            return Err(ConfigError::InvalidRule {
                id: rule.id.clone(),
                reason: "Duplicate rule ID".to_string(),
            });
        }

        if rule.category.parse::<IndustryCategory>().is_err() {
            return Err(ConfigError::InvalidRule {
                id: rule.id.clone(),
                reason: format!("Unknown category: {}", rule.category),
            });
        }

        validate_match_condition(&rule.match_condition, &rule.id)?;
    }

    Ok(())
}

fn validate_match_condition(condition: &MatchCondition, rule_id: &str) -> Result<(), ConfigError> {
    match condition {
        MatchCondition::Compound(compound) => {
            if let Some(all) = &compound.all {
                for cond in all {
                    validate_match_condition(cond, rule_id)?;
                }
            }
            if let Some(any) = &compound.any {
                for cond in any {
                    validate_match_condition(cond, rule_id)?;
                }
            }
            if let Some(not) = &compound.not {
                validate_match_condition(not, rule_id)?;
            }
        }
        MatchCondition::Simple(simple) => {
            if let Some(pattern) = &simple.pattern {
                if let Err(e) = regex::Regex::new(pattern) {
                    return Err(ConfigError::InvalidRule {
                        id: rule_id.to_string(),
                        reason: format!("Invalid regex pattern: {}", e),
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RuleTier;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database": { "path": "/var/lib/grantflow/jobs.db" },
            "worker": { "count": 4, "id": "worker-a", "batch": "2024-03", "batch_size": 20 },
            "retry": { "max_attempts": 5, "base_backoff_secs": 30, "max_backoff_secs": 600 },
            "claim": { "stale_after_secs": 900 },
            "extraction": { "min_text_length": 150 },
            "classification": {
                "rules": [
                    {
                        "id": "hydrogen",
                        "category": "ENERGY",
                        "tier": "specific",
                        "match": { "containsAny": ["수소", "연료전지"] }
                    }
                ]
            }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.database.path, "/var/lib/grantflow/jobs.db");
        assert_eq!(config.worker.count, 4);
        assert_eq!(config.worker.id.as_deref(), Some("worker-a"));
        assert_eq!(config.worker.batch.as_deref(), Some("2024-03"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.claim.stale_after_secs, 900);
        assert_eq!(config.extraction.min_text_length, 150);
        assert_eq!(config.classification.rules.len(), 1);
        assert_eq!(config.classification.rules[0].tier, RuleTier::Specific);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"version": "1.0", "worker": {{"count": 2}}}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.worker.count, 2);
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/grantflow.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{"version": "2.0"}"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_schema_rejects_unknown_keys() {
        let result = load_config_from_str(r#"{"version": "1.0", "input_directory": "/in"}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_zero_workers() {
        let result = load_config_from_str(r#"{"version": "1.0", "worker": {"count": 0}}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_backoff_bounds() {
        let result = load_config_from_str(
            r#"{"version": "1.0", "retry": {"base_backoff_secs": 600, "max_backoff_secs": 60}}"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_regex_pattern() {
        let config_json = r#"
        {
            "version": "1.0",
            "classification": {
                "rules": [
                    { "id": "broken", "category": "ICT", "match": { "pattern": "[invalid(" } }
                ]
            }
        }
        "#;

        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::InvalidRule { id, .. }) if id == "broken"));
    }

    #[test]
    fn test_duplicate_rule_ids() {
        let config_json = r#"
        {
            "version": "1.0",
            "classification": {
                "rules": [
                    { "id": "dup", "category": "ICT", "match": { "contains": "AI" } },
                    { "id": "dup", "category": "BIO", "match": { "contains": "바이오" } }
                ]
            }
        }
        "#;

        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::InvalidRule { reason, .. }) if reason.contains("Duplicate")));
    }

    #[test]
    fn test_unknown_category() {
        let config_json = r#"
        {
            "version": "1.0",
            "classification": {
                "rules": [
                    { "id": "space", "category": "SPACE_TOURISM", "match": { "contains": "우주" } }
                ]
            }
        }
        "#;

        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::InvalidRule { .. })));
    }

    #[test]
    fn test_nested_pattern_is_validated() {
        let config_json = r#"
        {
            "version": "1.0",
            "classification": {
                "rules": [
                    {
                        "id": "nested",
                        "category": "ICT",
                        "match": { "all": [ { "contains": "AI" }, { "not": { "pattern": "(unclosed" } } ] }
                    }
                ]
            }
        }
        "#;

        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_conversion_requires_credentials() {
        let config_json = r#"
        {
            "version": "1.0",
            "conversion": {
                "enabled": true,
                "login_url": "https://converter.example/login",
                "converter_url": "https://converter.example/convert",
                "username": "svc"
            }
        }
        "#;
        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::Validation { .. })
        ));

        let with_env = config_json.replace(r#""username": "svc""#, r#""username": "svc", "password_env": "CONVERTER_PASSWORD""#);
        let config = load_config_from_str(&with_env).unwrap();
        assert!(config.conversion.enabled);
    }

    #[test]
    fn test_disabled_conversion_needs_nothing() {
        let config =
            load_config_from_str(r#"{"version": "1.0", "conversion": {"enabled": false}}"#).unwrap();
        assert!(!config.conversion.enabled);
    }
}
