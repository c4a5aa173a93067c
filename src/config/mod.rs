//! Configuration loaded from `config.yaml`.
//!
//! Secrets (API tokens, model keys) are never stored in the file
//! itself; the config names environment variables and the values are
//! read at startup.

use std::path::Path;

use anyhow::Context;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::schedule::{WorkingHours, DEFAULT_TIMEZONE};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// IANA timezone all business times are interpreted in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Address the HTTP gateway binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base URL used when rendering confirmation links.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Most-recent exchanges replayed into the prompt per turn.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Think/act/observe iterations allowed per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    pub model: ModelConfig,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_history_limit() -> usize {
    40
}

fn default_max_iterations() -> usize {
    8
}

/// Turn-level concurrency limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Cap on in-flight turns across all conversations.
    #[serde(default = "default_max_concurrent_turns")]
    pub max_concurrent_turns: usize,
    /// Hard deadline for a single turn, in seconds.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

fn default_max_concurrent_turns() -> usize {
    16
}

fn default_turn_timeout_secs() -> u64 {
    120
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_turns: default_max_concurrent_turns(),
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

/// Slot shape and booking policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BookingConfig {
    /// Appointment length in minutes.
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: i64,
    /// Step between candidate slot starts, in minutes.
    #[serde(default = "default_granularity_minutes")]
    pub granularity_minutes: i64,
    #[serde(default)]
    pub working_hours: WorkingHours,
    /// Re-run the past/same-day guard on reschedule targets.
    #[serde(default)]
    pub revalidate_reschedule: bool,
    /// Leads below this monthly budget are politely declined.  Unset
    /// disables budget qualification.
    #[serde(default)]
    pub min_monthly_budget: Option<i64>,
}

fn default_slot_minutes() -> i64 {
    60
}

fn default_granularity_minutes() -> i64 {
    60
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            slot_minutes: default_slot_minutes(),
            granularity_minutes: default_granularity_minutes(),
            working_hours: WorkingHours::default(),
            revalidate_reschedule: false,
            min_monthly_budget: None,
        }
    }
}

/// Which calendar backend to use.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CalendarConfig {
    /// `local` (in-memory) or `remote` (HTTP).
    #[serde(default = "default_calendar_provider")]
    pub provider: String,
    /// Remote API base URL, e.g. `https://www.googleapis.com/calendar/v3`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Remote calendar id.
    #[serde(default)]
    pub calendar_id: Option<String>,
    /// Env var holding the remote API token.
    #[serde(default = "default_calendar_token_env")]
    pub api_token_env: String,
}

fn default_calendar_provider() -> String {
    "local".to_string()
}

fn default_calendar_token_env() -> String {
    "FRONTDESK_CALENDAR_TOKEN".to_string()
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            provider: default_calendar_provider(),
            base_url: None,
            calendar_id: None,
            api_token_env: default_calendar_token_env(),
        }
    }
}

/// Chat-completions backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Full chat-completions endpoint URL.
    pub endpoint: String,
    /// Model name sent in the request body.
    pub model: String,
    /// Env var holding the API key; may be unset for local servers.
    #[serde(default = "default_model_key_env")]
    pub api_key_env: String,
}

fn default_model_key_env() -> String {
    "FRONTDESK_MODEL_KEY".to_string()
}

impl Config {
    /// Read and parse a YAML configuration file.  A relative
    /// `config.yaml` that doesn't exist falls back to the one in the
    /// frontdesk home directory.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let filename = path.file_name().and_then(|f| f.to_str());
                if filename == Some("config.yaml") && path.is_relative() {
                    let home_path = crate::frontdesk_home().join("config.yaml");
                    match tokio::fs::read_to_string(&home_path).await {
                        Ok(c) => {
                            tracing::warn!(
                                attempted = %path.display(),
                                found = %home_path.display(),
                                "config file not found, falling back to frontdesk home"
                            );
                            c
                        }
                        Err(_) => {
                            return Err(e).with_context(|| {
                                format!("failed to read config file: {}", path.display())
                            })
                        }
                    }
                } else {
                    return Err(e).with_context(|| {
                        format!("failed to read config file: {}", path.display())
                    });
                }
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()))
            }
        };

        let config: Config =
            serde_yaml_ng::from_str(&contents).context("failed to parse config YAML")?;
        config.validate()?;
        tracing::debug!(
            timezone = %config.timezone,
            calendar = %config.calendar.provider,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> anyhow::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("config: unknown timezone '{}'", self.timezone))
    }

    /// Validate semantic constraints that serde cannot enforce.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.tz()?;
        self.booking
            .working_hours
            .validate()
            .context("config: working_hours")?;

        if self.booking.slot_minutes <= 0 {
            anyhow::bail!("config: slot_minutes must be positive");
        }
        if self.booking.granularity_minutes <= 0 {
            anyhow::bail!("config: granularity_minutes must be positive");
        }
        if self.max_iterations == 0 {
            anyhow::bail!("config: max_iterations must be at least 1");
        }
        if self.concurrency.max_concurrent_turns == 0 {
            anyhow::bail!("config: max_concurrent_turns must be at least 1");
        }

        match self.calendar.provider.as_str() {
            "local" => {}
            "remote" => {
                if self.calendar.base_url.is_none() || self.calendar.calendar_id.is_none() {
                    anyhow::bail!(
                        "config: calendar provider 'remote' requires base_url and calendar_id"
                    );
                }
            }
            other => anyhow::bail!("config: unknown calendar provider '{other}'"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "\
model:
  endpoint: http://localhost:11434/v1/chat/completions
  model: llama3
";

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = serde_yaml_ng::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.timezone, DEFAULT_TIMEZONE);
        assert_eq!(config.booking.slot_minutes, 60);
        assert_eq!(config.booking.working_hours.start_hour, 9);
        assert_eq!(config.calendar.provider, "local");
        assert!(config.booking.min_monthly_budget.is_none());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let yaml = format!("timezone: Mars/Olympus\n{MINIMAL}");
        let config: Config = serde_yaml_ng::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn remote_calendar_requires_endpoint_fields() {
        let yaml = format!("calendar:\n  provider: remote\n{MINIMAL}");
        let config: Config = serde_yaml_ng::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_working_hours_are_rejected() {
        let yaml = format!(
            "booking:\n  working_hours:\n    start_hour: 17\n    end_hour: 9\n{MINIMAL}"
        );
        let config: Config = serde_yaml_ng::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
