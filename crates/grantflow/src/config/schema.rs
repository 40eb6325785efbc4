use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub claim: ClaimConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
}

pub const CONFIG_VERSION: &str = "1.0";

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            database: DatabaseConfig::default(),
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
            claim: ClaimConfig::default(),
            extraction: ExtractionConfig::default(),
            source: SourceConfig::default(),
            conversion: ConversionConfig::default(),
            classification: ClassificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| {
            p.join("grantflow")
                .join("grantflow.db")
                .to_string_lossy()
                .to_string()
        })
        .unwrap_or_else(|| "grantflow.db".to_string())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Identity written into `processing_worker`. Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Only claim jobs carrying this batch tag.
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> usize {
    50
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            id: None,
            batch: None,
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    60
}

fn default_max_backoff() -> u64 {
    3600
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// A PROCESSING claim older than this is considered abandoned.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_stale_after() -> u64 {
    30 * 60
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
    #[serde(default = "default_budget_window")]
    pub budget_window_chars: usize,
}

fn default_min_text_length() -> usize {
    100
}

fn default_budget_window() -> usize {
    crate::fields::budget::DEFAULT_WINDOW_CHARS
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_length: default_min_text_length(),
            budget_window_chars: default_budget_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Attachments larger than this are not downloaded.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

fn default_source_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("grantflow/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attachment_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_source_timeout(),
            user_agent: default_user_agent(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

/// Web converter used when native parsing yields no usable text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub login_url: String,
    #[serde(default)]
    pub converter_url: String,
    #[serde(default)]
    pub username: String,
    /// Password given directly. Prefer `password_file` or `password_env`.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_file: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub selectors: SelectorConfig,
    #[serde(default)]
    pub scripts: ScriptConfig,
    #[serde(default = "default_conversion_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_round_trip_timeout")]
    pub round_trip_timeout_secs: u64,
    #[serde(default = "default_session_max_age")]
    pub session_max_age_secs: u64,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub chrome_executable: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_conversion_poll() -> u64 {
    2
}

fn default_call_timeout() -> u64 {
    30
}

fn default_round_trip_timeout() -> u64 {
    180
}

fn default_session_max_age() -> u64 {
    30 * 60
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            login_url: String::new(),
            converter_url: String::new(),
            username: String::new(),
            password: None,
            password_file: None,
            password_env: None,
            selectors: SelectorConfig::default(),
            scripts: ScriptConfig::default(),
            poll_interval_secs: default_conversion_poll(),
            call_timeout_secs: default_call_timeout(),
            round_trip_timeout_secs: default_round_trip_timeout(),
            session_max_age_secs: default_session_max_age(),
            headless: true,
            chrome_executable: None,
        }
    }
}

/// CSS selectors on the converter's login and upload pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default = "default_username_selector")]
    pub username: String,
    #[serde(default = "default_password_selector")]
    pub password: String,
    #[serde(default = "default_login_button_selector")]
    pub login_button: String,
    #[serde(default = "default_file_input_selector")]
    pub file_input: String,
    #[serde(default = "default_convert_button_selector")]
    pub convert_button: String,
}

fn default_username_selector() -> String {
    "input[name=username]".to_string()
}

fn default_password_selector() -> String {
    "input[type=password]".to_string()
}

fn default_login_button_selector() -> String {
    "button[type=submit]".to_string()
}

fn default_file_input_selector() -> String {
    "input[type=file]".to_string()
}

fn default_convert_button_selector() -> String {
    "#convert".to_string()
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            username: default_username_selector(),
            password: default_password_selector(),
            login_button: default_login_button_selector(),
            file_input: default_file_input_selector(),
            convert_button: default_convert_button_selector(),
        }
    }
}

/// Page scripts evaluated by the browser service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "default_logged_in_script")]
    pub logged_in: String,
    #[serde(default = "default_status_script")]
    pub status: String,
    #[serde(default = "default_text_script")]
    pub text: String,
}

fn default_logged_in_script() -> String {
    "document.querySelector('input[type=password]') === null".to_string()
}

fn default_status_script() -> String {
    "(() => { const el = document.querySelector('[data-status]'); \
     return el ? el.getAttribute('data-status') : 'pending'; })()"
        .to_string()
}

fn default_text_script() -> String {
    "(() => { const el = document.querySelector('#result'); \
     return el ? el.innerText : ''; })()"
        .to_string()
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            logged_in: default_logged_in_script(),
            status: default_status_script(),
            text: default_text_script(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Custom rules merged into the built-in taxonomy.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    /// Industry category name, e.g. `ENERGY`.
    pub category: String,
    #[serde(default)]
    pub tier: RuleTier,
    /// Overrides the tier's default priority.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Overrides the tier's default scope.
    #[serde(default)]
    pub scope: Option<RuleScope>,
    #[serde(rename = "match")]
    pub match_condition: MatchCondition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleTier {
    #[default]
    Specific,
    Agency,
    Generic,
    MinistryDefault,
}

impl RuleTier {
    pub fn default_priority(&self) -> i32 {
        match self {
            Self::Specific => 100,
            Self::Agency => 80,
            Self::Generic => 50,
            Self::MinistryDefault => 10,
        }
    }

    pub fn default_scope(&self) -> RuleScope {
        match self {
            Self::Specific | Self::Generic => RuleScope::Content,
            Self::Agency | Self::MinistryDefault => RuleScope::Agency,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Specific => "specific",
            Self::Agency => "agency",
            Self::Generic => "generic",
            Self::MinistryDefault => "ministry-default",
        }
    }
}

/// Which part of the announcement a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// Title and description.
    Content,
    /// Ministry and agency names.
    Agency,
}

/// Custom deserialization for MatchCondition to properly handle untagged enum.
/// Both SimpleMatch and CompoundMatch have all optional fields, so the
/// compound keys decide which one is meant.
#[derive(Debug, Clone, Serialize)]
pub enum MatchCondition {
    Simple(SimpleMatch),
    Compound(CompoundMatch),
}

impl<'de> serde::Deserialize<'de> for MatchCondition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        use serde_json::Value;

        let value = Value::deserialize(deserializer)?;

        if let Value::Object(map) = &value {
            if map.contains_key("all") || map.contains_key("any") || map.contains_key("not") {
                let compound: CompoundMatch = serde_json::from_value(value)
                    .map_err(|e| D::Error::custom(format!("Invalid compound match: {}", e)))?;
                return Ok(MatchCondition::Compound(compound));
            }
            let simple: SimpleMatch = serde_json::from_value(value)
                .map_err(|e| D::Error::custom(format!("Invalid simple match: {}", e)))?;
            return Ok(MatchCondition::Simple(simple));
        }

        Err(D::Error::custom("MatchCondition must be an object"))
    }
}

impl MatchCondition {
    pub fn contains_any(keywords: &[&str]) -> Self {
        Self::Simple(SimpleMatch {
            contains_any: Some(keywords.iter().map(|k| k.to_string()).collect()),
            ..SimpleMatch::default()
        })
    }

    pub fn pattern(pattern: &str) -> Self {
        Self::Simple(SimpleMatch {
            pattern: Some(pattern.to_string()),
            ..SimpleMatch::default()
        })
    }

    pub fn any(conditions: Vec<MatchCondition>) -> Self {
        Self::Compound(CompoundMatch {
            any: Some(conditions),
            ..CompoundMatch::default()
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompoundMatch {
    #[serde(default)]
    pub all: Option<Vec<MatchCondition>>,
    #[serde(default)]
    pub any: Option<Vec<MatchCondition>>,
    #[serde(default)]
    pub not: Option<Box<MatchCondition>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimpleMatch {
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(rename = "containsAny", default)]
    pub contains_any: Option<Vec<String>>,
    #[serde(rename = "containsAll", default)]
    pub contains_all: Option<Vec<String>>,
    #[serde(default)]
    pub pattern: Option<String>,
}
