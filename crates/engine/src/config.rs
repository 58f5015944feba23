use anyhow::{Result, ensure};
use serde::Deserialize;

use crate::rules::RuleSpec;

/// Top-level configuration file: pacing settings plus the rule catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub settings: Settings,
    pub rules: Vec<RuleSpec>,
}

/// Pacing knobs; every field has a shipped default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Total session length used for the countdown, in minutes.
    pub session_budget_minutes: u64,
    /// Minimum interval between processed messages from one sender.
    pub cooldown_ms: u64,
    /// Humanizing delay bounds for outgoing replies.
    pub reply_delay_min_ms: u64,
    pub reply_delay_max_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session_budget_minutes: 7,
            cooldown_ms: 2500,
            reply_delay_min_ms: 800,
            reply_delay_max_ms: 2000,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.session_budget_minutes >= 1,
            "session_budget_minutes must be at least 1"
        );
        ensure!(
            self.reply_delay_min_ms <= self.reply_delay_max_ms,
            "reply_delay_min_ms must not exceed reply_delay_max_ms"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_defaults_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.session_budget_minutes, 7);
        assert_eq!(settings.cooldown_ms, 2500);
        assert_eq!(settings.reply_delay_min_ms, 800);
        assert_eq!(settings.reply_delay_max_ms, 2000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn config_parses_with_partial_settings() {
        let yaml = r#"
settings:
  cooldown_ms: 100
rules:
  - category: catchall
    priority: 1
    trigger: { type: always }
    responses: ["ok"]
"#;
        let cfg: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.settings.cooldown_ms, 100);
        assert_eq!(cfg.settings.session_budget_minutes, 7);
        assert_eq!(cfg.rules.len(), 1);
    }

    #[test]
    fn inverted_delay_bounds_rejected() {
        let settings = Settings {
            reply_delay_min_ms: 3000,
            reply_delay_max_ms: 2000,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
