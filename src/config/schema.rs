//! Configuration schema for parley.toml (TOML-based).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    /// Tenant/agent identifier used for token lookups and interaction records.
    pub agent_id: String,

    /// Human-readable agent name.
    pub agent_name: String,

    /// Persona description embedded in every composed reply prompt.
    pub persona: String,

    /// Communication-style guide for composed replies.
    pub style_guide: String,

    /// Goal guide for composed replies.
    pub goal_guide: String,

    /// LLM API base URL (OpenAI-compatible).
    pub llm_api_url: String,

    /// LLM API key.
    pub llm_api_key: String,

    /// Model used for intention detection and reply composition.
    pub model: String,

    /// Maximum tokens per completion.
    pub max_tokens: u32,

    /// Human-readable timezone label shown in tenant settings.
    pub timezone_label: String,

    /// Tenant-specific additions to the label → IANA zone table.
    pub timezone_overrides: HashMap<String, String>,

    /// Split long replies into delimiter-separated short segments.
    pub split_responses: bool,

    /// Delimiter the model is told to emit between segments.
    pub split_delimiter: String,

    /// Synthesize audio for outbound replies.
    pub audio_replies: bool,

    /// Recent-history window fed to the detector.
    pub history_window: usize,

    /// Static bearer token for webhook intentions (a real deployment plugs in
    /// a refreshing OAuth provider instead).
    pub access_token: String,

    /// Per-call timeout for outbound HTTP, in seconds.
    pub http_timeout_secs: u64,

    /// Path to the tenant intention catalog (YAML).
    pub catalog_path: String,

    /// Path to the SQLite chat store.
    pub db_path: String,

    /// Log level (debug, info, warn, error).
    pub log_level: String,

    /// Availability rules for meeting scheduling.
    pub availability: AvailabilityConfig,
}

/// Tenant availability window for meeting validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Bookable weekdays, lowercase three-letter names.
    pub weekdays: Vec<String>,

    /// Earliest bookable local time, "HH:MM".
    pub day_start: String,

    /// Latest bookable local time, "HH:MM".
    pub day_end: String,

    /// How far ahead a meeting may be booked, in days.
    pub max_days_ahead: i64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            weekdays: ["mon", "tue", "wed", "thu", "fri"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            day_start: "08:00".into(),
            day_end: "18:00".into(),
            max_days_ahead: 60,
        }
    }
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            agent_name: String::new(),
            persona: String::new(),
            style_guide: String::new(),
            goal_guide: String::new(),
            llm_api_url: "https://api.openai.com".into(),
            llm_api_key: String::new(),
            model: "gpt-4o".into(),
            max_tokens: 1024,
            timezone_label: "UTC".into(),
            timezone_overrides: HashMap::new(),
            split_responses: false,
            split_delimiter: "||".into(),
            audio_replies: false,
            history_window: 20,
            access_token: String::new(),
            http_timeout_secs: 30,
            catalog_path: "~/.parley/intentions.yml".into(),
            db_path: "~/.parley/chats.db".into(),
            log_level: "info".into(),
            availability: AvailabilityConfig::default(),
        }
    }
}

impl ParleyConfig {
    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    /// Resolved chat store path.
    pub fn resolved_db_path(&self) -> String {
        self.resolve_path(&self.db_path)
    }

    /// Resolved intention catalog path.
    pub fn resolved_catalog_path(&self) -> String {
        self.resolve_path(&self.catalog_path)
    }
}
