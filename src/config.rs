use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::cancellation::CancelPolicy;
use crate::error::EngineError;
use crate::ranking::WinLossParams;

/// A seconds value as a duration, rejecting what a duration cannot hold
pub(crate) fn checked_seconds(field: &str, secs: i64) -> Result<Duration, EngineError> {
    Duration::try_seconds(secs)
        .ok_or_else(|| EngineError::Config(format!("{} is out of range: {}", field, secs)))
}

/// Environment variables override file values, e.g. `GRIDWARDEN__POLICY__LOSS_FLOOR=-0.03`
pub const ENV_PREFIX: &str = "GRIDWARDEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// ROI samples older than this are dropped on every observation
    pub sample_retention_secs: Option<i64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sample_retention_secs: Some(24 * 3600),
        }
    }
}

impl TrackerConfig {
    pub fn sample_retention(&self) -> Option<Duration> {
        self.sample_retention_secs.and_then(Duration::try_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Symbol+direction cohorts ranked at or beyond this are not opened
    pub max_cohort_rank: usize,
    pub win_loss: WinLossParams,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_cohort_rank: 3,
            win_loss: WinLossParams::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub tracker: TrackerConfig,
    pub scoring: ScoringConfig,
    pub policy: CancelPolicy,
}

impl EngineConfig {
    /// Defaults, then the optional file, then `GRIDWARDEN__*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self, EngineError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(secs) = self.tracker.sample_retention_secs {
            if secs <= 0 {
                return Err(EngineError::Config(
                    "tracker.sample_retention_secs must be positive".to_string(),
                ));
            }
            checked_seconds("tracker.sample_retention_secs", secs)?;
        }

        if self.scoring.max_cohort_rank == 0 {
            return Err(EngineError::Config("scoring.max_cohort_rank must be at least 1".to_string()));
        }
        let params = &self.scoring.win_loss;
        if params.short_running_secs < 0 {
            return Err(EngineError::Config(
                "scoring.win_loss.short_running_secs is negative".to_string(),
            ));
        }
        checked_seconds("scoring.win_loss.short_running_secs", params.short_running_secs)?;
        let fractions = [
            ("negligible_change", params.negligible_change),
            ("deep_drawdown", params.deep_drawdown),
            ("small_move", params.small_move),
            ("bound_touch_credit", params.bound_touch_credit),
            ("drawdown_discount", params.drawdown_discount),
            ("small_move_discount", params.small_move_discount),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "scoring.win_loss.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        self.policy.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring.win_loss.neutral_escape_penalty, -12.0);
        assert_eq!(config.tracker.sample_retention(), Some(Duration::hours(24)));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [policy]
            loss_floor = -0.03
            cancel_out_of_range = true

            [scoring]
            max_cohort_rank = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.policy.loss_floor, -0.03);
        assert!(config.policy.cancel_out_of_range);
        assert_eq!(config.policy.take_profit_roi, None);
        assert_eq!(config.scoring.max_cohort_rank, 5);
        assert_eq!(config.scoring.win_loss, WinLossParams::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml_str("[scoring]\nmax_cohort_rank = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_cohort_rank"));

        let err = EngineConfig::from_toml_str("[scoring.win_loss]\nsmall_move = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("small_move"));

        let err = EngineConfig::from_toml_str("[policy]\ntrailing_giveback = -0.01\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let err = EngineConfig::from_toml_str("[policy]\ncooldown_after_cancel_secs = 9223372036854775807\n")
            .unwrap_err();
        assert!(err.to_string().contains("cooldown_after_cancel_secs"));

        let err = EngineConfig::from_toml_str("[tracker]\nsample_retention_secs = 9223372036854775807\n")
            .unwrap_err();
        assert!(err.to_string().contains("sample_retention_secs"));

        let err = EngineConfig::from_toml_str("[scoring.win_loss]\nshort_running_secs = 9223372036854775807\n")
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        // Built by hand past validation, the durations stay usable
        let policy = CancelPolicy {
            cooldown_after_cancel_secs: Some(i64::MAX),
            ..CancelPolicy::default()
        };
        assert_eq!(policy.cooldown(), None);
        let tracker = TrackerConfig {
            sample_retention_secs: Some(i64::MAX),
        };
        assert_eq!(tracker.sample_retention(), None);
    }

    #[test]
    fn test_rules_enabled_only_when_configured() {
        let config = EngineConfig::from_toml_str(
            r#"
            [policy]
            max_continuous_loss = 4
            cooldown_after_cancel_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.policy.max_continuous_loss, Some(4));
        assert_eq!(config.policy.take_profit_roi, None);
        assert_eq!(config.policy.trailing_giveback, None);
        assert_eq!(config.policy.stale_after_secs, None);
        assert_eq!(config.policy.cooldown(), None);
    }
}
