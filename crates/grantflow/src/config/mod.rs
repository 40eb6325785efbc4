pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    ClaimConfig, ClassificationConfig, CompoundMatch, Config, ConversionConfig, DatabaseConfig,
    ExtractionConfig, MatchCondition, RetryConfig, RuleConfig, RuleScope, RuleTier, ScriptConfig,
    SelectorConfig, SimpleMatch, SourceConfig, WorkerConfig, CONFIG_VERSION,
};
