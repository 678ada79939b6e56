use std::time::Duration;

use stickies_core::events::DEFAULT_CHANNEL;

use crate::error::EngineError;

/// Per-session tunables. `Default` carries the production values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Quiet period after the last keystroke before a draft commits.
    pub autosave_delay: Duration,
    /// How long after a local write an incoming event for the same entity is
    /// treated as an echo.
    pub echo_grace: Duration,
    pub rule_refresh: Duration,
    /// Container for new notes when no folder is open.
    pub default_folder: String,
    /// Always listed last, in this order.
    pub system_folders: Vec<String>,
    pub channel: String,
    pub relay_url: Option<String>,
    pub relay_group_id: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_delay: Duration::from_millis(2000),
            echo_grace: Duration::from_millis(3000),
            rule_refresh: Duration::from_secs(60),
            default_folder: "General".to_string(),
            system_folders: vec!["PAGES".to_string(), "CLAUDE".to_string()],
            channel: DEFAULT_CHANNEL.to_string(),
            relay_url: None,
            relay_group_id: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables (and a `.env` file when
    /// present) with fallback to defaults.
    pub fn from_env() -> Result<Self, EngineError> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            tracing::warn!(error = %e, "failed to read .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let mut config = Self::default();

        if let Some(val) = lookup("STICKIES_AUTOSAVE_MS") {
            config.autosave_delay = Duration::from_millis(parse_number("STICKIES_AUTOSAVE_MS", &val)?);
        }
        if let Some(val) = lookup("STICKIES_ECHO_GRACE_MS") {
            config.echo_grace = Duration::from_millis(parse_number("STICKIES_ECHO_GRACE_MS", &val)?);
        }
        if let Some(val) = lookup("STICKIES_RULE_REFRESH_SECS") {
            config.rule_refresh = Duration::from_secs(parse_number("STICKIES_RULE_REFRESH_SECS", &val)?);
        }
        if let Some(val) = lookup("STICKIES_DEFAULT_FOLDER")
            && !val.trim().is_empty()
        {
            config.default_folder = val.trim().to_string();
        }
        if let Some(val) = lookup("STICKIES_RELAY_URL") {
            config.relay_url = Some(val.trim().to_string()).filter(|v| !v.is_empty());
        }
        if let Some(val) = lookup("STICKIES_RELAY_GROUP_ID") {
            config.relay_group_id = Some(val.trim().to_string()).filter(|v| !v.is_empty());
        }

        Ok(config)
    }

    pub fn is_system_folder(&self, name: &str) -> bool {
        self.system_folders.iter().any(|s| s == name)
    }
}

fn parse_number(key: &str, val: &str) -> Result<u64, EngineError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| EngineError::Config(format!("{key} must be a non-negative integer, got {val:?}")))
}
