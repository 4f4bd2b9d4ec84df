use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

use crate::services::session_store::SessionEviction;
use crate::settlement::PollPolicy;

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub billing_service: BillingServiceSettings,
    #[serde(default)]
    pub settlement: SettlementSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct BillingServiceSettings {
    /// Base URL of the billing backend (e.g., http://billing-service:3000).
    pub url: String,
    /// Bearer token presented to the billing backend, if it requires one.
    #[serde(default)]
    pub api_token: Option<Secret<String>>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl BillingServiceSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    15
}

/// Gateway status polling (fixed interval, no backoff) and dialog eviction.
#[derive(Deserialize, Clone, Debug)]
pub struct SettlementSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Dialogs nobody has looked at for this long are closed and dropped.
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
    /// Grace period for a finished dialog so the page can read its outcome.
    #[serde(default = "default_finished_session_ttl_secs")]
    pub finished_session_ttl_secs: u64,
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
            finished_session_ttl_secs: default_finished_session_ttl_secs(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
        }
    }
}

impl SettlementSettings {
    /// A zero interval would hammer the gateway and zero polls would time out
    /// every payment unseen, so both are rejected.
    pub fn poll_policy(&self) -> Result<PollPolicy, config::ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "settlement.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_polls == 0 {
            return Err(config::ConfigError::Message(
                "settlement.max_polls must be at least 1".to_string(),
            ));
        }

        Ok(PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_polls: self.max_polls,
        })
    }

    pub fn eviction(&self) -> SessionEviction {
        SessionEviction {
            idle_timeout: Duration::from_secs(self.session_idle_timeout_secs),
            finished_ttl: Duration::from_secs(self.finished_session_ttl_secs),
            sweep_interval: Duration::from_secs(self.session_sweep_interval_secs.max(1)),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_max_polls() -> u32 {
    100
}

fn default_session_idle_timeout_secs() -> u64 {
    1800
}

fn default_finished_session_ttl_secs() -> u64 {
    60
}

fn default_session_sweep_interval_secs() -> u64 {
    30
}

#[derive(Deserialize, Clone, Debug)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP collector (e.g., http://tempo:4317). Spans stay local when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("cannot read current dir: {}", e)))?;

    // Check if we're already in clinic-frontend directory or need to navigate to it
    let configuration_directory = if base_path.ends_with("clinic-frontend") {
        base_path.join("config")
    } else {
        base_path.join("clinic-frontend").join("config")
    };

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")).required(true))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_defaults_match_poll_budget() {
        let policy = SettlementSettings::default().poll_policy().unwrap();
        assert_eq!(policy.interval, Duration::from_secs(3));
        assert_eq!(policy.max_polls, 100);
    }

    #[test]
    fn test_zero_poll_settings_are_rejected() {
        let no_interval = SettlementSettings {
            poll_interval_secs: 0,
            ..SettlementSettings::default()
        };
        let no_budget = SettlementSettings {
            max_polls: 0,
            ..SettlementSettings::default()
        };

        let err = no_interval.poll_policy().unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
        let err = no_budget.poll_policy().unwrap_err();
        assert!(err.to_string().contains("max_polls"));
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
server:
  host: 127.0.0.1
  port: 8080
billing_service:
  url: http://localhost:3000
"#,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.billing_service.request_timeout(), Duration::from_secs(15));
        assert!(settings.billing_service.api_token.is_none());
        assert_eq!(settings.settlement.max_polls, 100);
        let eviction = settings.settlement.eviction();
        assert_eq!(eviction.idle_timeout, Duration::from_secs(1800));
        assert_eq!(eviction.finished_ttl, Duration::from_secs(60));
        assert_eq!(settings.telemetry.log_level, "info");
    }
}
