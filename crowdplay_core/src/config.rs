//! Runtime configuration for Crowdplay.

use crate::catalog::Catalog;
use crate::error::ConfigError;
use crowdplay_env::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pacing of a session's round loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Step at which the pending release input is sent (default: 15)
    pub midpoint_ticks: u32,

    /// Capture a frame every this many steps (default: 8)
    pub capture_every: u32,

    /// Emulator steps per real-time second, used for playback speed (default: 60)
    pub engine_hz: u32,

    /// Delay between tally polls in milliseconds (default: 5000)
    pub poll_interval_ms: u64,

    /// Fruitless polls before an idle session is closed; `None` disables expiry (default: 720)
    pub idle_expiry_polls: Option<u32>,

    /// Attempts at publishing a ballot before the session crashes (default: 5)
    pub publish_attempts: u32,

    /// Pause between publish attempts in milliseconds (default: 500)
    pub publish_retry_delay_ms: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            midpoint_ticks: 15,
            capture_every: 8,
            engine_hz: 60,
            poll_interval_ms: 5_000,
            idle_expiry_polls: Some(720),
            publish_attempts: 5,
            publish_retry_delay_ms: 500,
        }
    }
}

impl RoundConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn publish_retry_delay(&self) -> Duration {
        Duration::from_millis(self.publish_retry_delay_ms)
    }

    /// Real-time length of a round of `ticks` steps, in milliseconds.
    pub fn round_duration_ms(&self, ticks: u32) -> u32 {
        (u64::from(ticks) * 1000 / u64::from(self.engine_hz.max(1))) as u32
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdplayConfig {
    /// Round pacing
    pub round: RoundConfig,

    /// Sessions that never expire from inactivity
    pub exempt_sessions: Vec<SessionId>,

    /// Where saved checkpoints live
    pub checkpoint_dir: PathBuf,

    /// Prefix of text commands (default: '!')
    pub command_prefix: String,

    /// Environment used when `start`/`load` omit one
    pub default_environment: String,

    /// Environment catalog; the built-in catalog when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environments: Option<Catalog>,
}

impl Default for CrowdplayConfig {
    fn default() -> Self {
        Self {
            round: RoundConfig::default(),
            exempt_sessions: Vec::new(),
            checkpoint_dir: PathBuf::from("./saves"),
            command_prefix: "!".to_string(),
            default_environment: "pkm_red".to_string(),
            environments: None,
        }
    }
}

impl CrowdplayConfig {
    /// Loads and validates a JSON config file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: CrowdplayConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the round pacing.
    pub fn with_round(mut self, round: RoundConfig) -> Self {
        self.round = round;
        self
    }

    /// Sets the environment catalog.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.environments = Some(catalog);
        self
    }

    /// Marks a session as exempt from idle expiry.
    pub fn with_exempt_session(mut self, session: SessionId) -> Self {
        self.exempt_sessions.push(session);
        self
    }

    /// Sets the checkpoint directory.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    /// The effective catalog.
    pub fn catalog(&self) -> Catalog {
        self.environments.clone().unwrap_or_else(Catalog::builtin)
    }

    /// The exempt sessions as a set.
    pub fn exempt_set(&self) -> HashSet<SessionId> {
        self.exempt_sessions.iter().copied().collect()
    }

    /// Rejects configurations the round loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.round.capture_every == 0 {
            return Err(ConfigError::Invalid("round.capture_every must be at least 1".into()));
        }
        if self.round.publish_attempts == 0 {
            return Err(ConfigError::Invalid("round.publish_attempts must be at least 1".into()));
        }
        if self.round.engine_hz == 0 {
            return Err(ConfigError::Invalid("round.engine_hz must be at least 1".into()));
        }
        if self.command_prefix.is_empty() {
            return Err(ConfigError::Invalid("command_prefix must not be empty".into()));
        }

        let catalog = self.catalog();
        let mut seen = HashSet::new();
        for env in catalog.iter() {
            if env.ticks_per_round == 0 {
                return Err(ConfigError::Invalid(format!(
                    "environment '{}' has a zero tick budget",
                    env.name
                )));
            }
            if env.name != env.name.to_lowercase() {
                return Err(ConfigError::Invalid(format!(
                    "environment name '{}' must be lower-case",
                    env.name
                )));
            }
            if !seen.insert(env.name.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate environment '{}'", env.name)));
            }
        }
        if catalog.get(&self.default_environment).is_none() {
            return Err(ConfigError::Invalid(format!(
                "default environment '{}' is not in the catalog",
                self.default_environment
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CrowdplayConfig::default();
        assert_eq!(config.round.midpoint_ticks, 15);
        assert_eq!(config.round.capture_every, 8);
        assert_eq!(config.round.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.round.idle_expiry_polls, Some(720));
        assert_eq!(config.round.publish_attempts, 5);
        assert_eq!(config.command_prefix, "!");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_duration() {
        let round = RoundConfig::default();
        assert_eq!(round.round_duration_ms(120), 2000);
        assert_eq!(round.round_duration_ms(60), 1000);
        assert_eq!(round.round_duration_ms(150), 2500);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CrowdplayConfig::from_json_str(
            r#"{"round": {"poll_interval_ms": 1000}, "exempt_sessions": [42]}"#,
        )
        .unwrap();

        assert_eq!(config.round.poll_interval_ms, 1000);
        assert_eq!(config.round.capture_every, 8);
        assert!(config.exempt_set().contains(&SessionId(42)));
        assert_eq!(config.catalog().len(), 10);
    }

    #[test]
    fn test_idle_expiry_can_be_disabled() {
        let config =
            CrowdplayConfig::from_json_str(r#"{"round": {"idle_expiry_polls": null}}"#).unwrap();
        assert_eq!(config.round.idle_expiry_polls, None);
    }

    #[test]
    fn test_rejects_zero_cadence() {
        let err = CrowdplayConfig::from_json_str(r#"{"round": {"capture_every": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_duplicate_environments() {
        let json = r#"{"default_environment": "a", "environments": {"environments": [
            {"name":"a","rom":"a.gb","default_checkpoint":"a.sv","ticks_per_round":60},
            {"name":"a","rom":"b.gb","default_checkpoint":"b.sv","ticks_per_round":60}
        ]}}"#;
        let err = CrowdplayConfig::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_unknown_default_environment() {
        let err = CrowdplayConfig::from_json_str(r#"{"default_environment": "zelda"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
