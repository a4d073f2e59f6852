use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::Duration;
use serde::Deserialize;

use super::defaults;
use crate::error::ConfigError;

/// Top-level configuration for the gatekeeper admission layer.
/// Deserializes from a TOML configuration file; selected fields can be
/// overridden from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::default_server_config")]
    pub server: ServerConfig,

    #[serde(default = "defaults::default_escalation_config")]
    pub escalation: EscalationConfig,

    #[serde(default = "defaults::default_click_velocity_config")]
    pub click_velocity: ClickVelocityConfig,

    #[serde(default = "defaults::default_rate_limit_config")]
    pub rate_limit: RateLimitConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,

    #[serde(default = "defaults::default_audit_config")]
    pub audit: AuditConfig,

    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,

    #[serde(default = "defaults::default_admin_api_config")]
    pub admin_api: AdminApiConfig,

    #[serde(default = "defaults::default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Settings {
    /// Load configuration from a TOML file at the given path.
    ///
    /// A missing file yields the defaults. Environment overrides are applied
    /// afterwards and the result is validated.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut settings = if Path::new(path).exists() {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
            Self::from_toml(&content).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })?
        } else {
            Settings::default()
        };

        settings.apply_env(|var| std::env::var(var).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply the recognized environment overrides. `lookup` abstracts
    /// `std::env::var` so the mapping can be exercised without touching the
    /// process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "VIOLATION_THRESHOLD", &mut self.escalation.violation_threshold)?;
        override_from(
            &lookup,
            "VIOLATION_EXPIRATION_SECONDS",
            &mut self.escalation.violation_expiration_secs,
        )?;
        override_from(&lookup, "BLOCK_DURATION_MS", &mut self.escalation.block_duration_ms)?;
        override_from(&lookup, "MAX_CLICKS", &mut self.click_velocity.max_clicks)?;
        override_from(
            &lookup,
            "MINIMUM_CLICK_INTERVAL_MS",
            &mut self.click_velocity.minimum_click_interval_ms,
        )?;
        override_from(
            &lookup,
            "TRACKER_EXPIRATION_MS",
            &mut self.click_velocity.tracker_expiration_ms,
        )?;
        override_from(&lookup, "WINDOW_MS", &mut self.rate_limit.window_ms)?;
        override_from(&lookup, "MAX_REQUESTS", &mut self.rate_limit.max_requests)?;
        Ok(())
    }

    /// Reject settings the detectors cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts: [(&'static str, u64); 3] = [
            ("escalation.violation_threshold", self.escalation.violation_threshold as u64),
            ("click_velocity.max_clicks", self.click_velocity.max_clicks as u64),
            ("rate_limit.max_requests", self.rate_limit.max_requests),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }

        // Seconds fields are compared in milliseconds; `None` overflowed.
        let durations: [(&'static str, Option<u64>); 7] = [
            (
                "escalation.violation_expiration_secs",
                self.escalation.violation_expiration_secs.checked_mul(1000),
            ),
            ("escalation.block_duration_ms", Some(self.escalation.block_duration_ms)),
            (
                "click_velocity.minimum_click_interval_ms",
                Some(self.click_velocity.minimum_click_interval_ms),
            ),
            (
                "click_velocity.tracker_expiration_ms",
                Some(self.click_velocity.tracker_expiration_ms),
            ),
            ("click_velocity.block_duration_ms", Some(self.click_velocity.block_duration_ms)),
            ("rate_limit.window_ms", Some(self.rate_limit.window_ms)),
            ("cleanup_interval_secs", self.cleanup_interval_secs.checked_mul(1000)),
        ];
        for (field, millis) in durations {
            match millis {
                Some(0) => {
                    return Err(ConfigError::Invalid {
                        field,
                        reason: "must be greater than zero",
                    })
                }
                Some(ms) if ms <= MAX_DURATION_MS => {}
                _ => {
                    return Err(ConfigError::Invalid {
                        field,
                        reason: "must not exceed 100 years",
                    })
                }
            }
        }

        if self.click_velocity.tracker_expiration_ms < self.click_velocity.minimum_click_interval_ms {
            return Err(ConfigError::Invalid {
                field: "click_velocity.tracker_expiration_ms",
                reason: "must not be shorter than minimum_click_interval_ms",
            });
        }

        Ok(())
    }
}

/// Longest accepted duration setting. Keeps every expiry instant derived
/// from configuration inside the representable date range.
pub const MAX_DURATION_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Validated settings always convert exactly; anything larger saturates.
fn millis(ms: u64) -> Duration {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(Duration::MAX)
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn override_from<F, T>(lookup: &F, var: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(var) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { var, value: raw.clone() })?;
    }
    Ok(())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: defaults::default_server_config(),
            escalation: defaults::default_escalation_config(),
            click_velocity: defaults::default_click_velocity_config(),
            rate_limit: defaults::default_rate_limit_config(),
            storage: defaults::default_storage_config(),
            audit: defaults::default_audit_config(),
            logging: defaults::default_logging_config(),
            admin_api: defaults::default_admin_api_config(),
            cleanup_interval_secs: defaults::default_cleanup_interval_secs(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::default_bind")]
    pub bind: String,
}

/// Rate-violation escalation thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "defaults::default_violation_threshold")]
    pub violation_threshold: u32,

    #[serde(default = "defaults::default_violation_expiration_secs")]
    pub violation_expiration_secs: u64,

    #[serde(default = "defaults::default_block_duration_ms")]
    pub block_duration_ms: u64,
}

impl EscalationConfig {
    pub fn violation_expiration(&self) -> Duration {
        seconds(self.violation_expiration_secs)
    }

    pub fn block_duration(&self) -> Duration {
        millis(self.block_duration_ms)
    }
}

/// Click-velocity (ad fraud) detector tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ClickVelocityConfig {
    #[serde(default = "defaults::default_max_clicks")]
    pub max_clicks: u32,

    #[serde(default = "defaults::default_minimum_click_interval_ms")]
    pub minimum_click_interval_ms: u64,

    #[serde(default = "defaults::default_tracker_expiration_ms")]
    pub tracker_expiration_ms: u64,

    /// Block TTL for identities flagged as click bots. Shares the escalation
    /// default unless set.
    #[serde(default = "defaults::default_block_duration_ms")]
    pub block_duration_ms: u64,
}

impl ClickVelocityConfig {
    pub fn minimum_click_interval(&self) -> Duration {
        millis(self.minimum_click_interval_ms)
    }

    pub fn tracker_expiration(&self) -> Duration {
        millis(self.tracker_expiration_ms)
    }

    pub fn block_duration(&self) -> Duration {
        millis(self.block_duration_ms)
    }
}

/// Fixed-window request limits per identity.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "defaults::default_window_ms")]
    pub window_ms: u64,

    #[serde(default = "defaults::default_max_requests")]
    pub max_requests: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        millis(self.window_ms)
    }
}

/// Which persistence backend holds the blocklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Journal,
}

/// Blocklist persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_storage_backend")]
    pub backend: StorageBackend,

    #[serde(default = "defaults::default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default = "defaults::default_journal_path")]
    pub journal_path: String,

    #[serde(default = "defaults::default_write_retries")]
    pub write_retries: u32,
}

/// Decision audit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Emit a DecisionRecord for every admitted request, not only rejections.
    #[serde(default)]
    pub log_admitted: bool,

    /// Optional JSON-lines decision log file.
    #[serde(default)]
    pub decision_log: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    pub level: String,

    #[serde(default = "defaults::default_log_file")]
    pub file: String,
}

/// Operator API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminApiConfig {
    #[serde(default = "defaults::default_api_key")]
    pub api_key: String,
}
