use std::path::PathBuf;

use crate::calendar::Calendar;
use crate::engine::EngineSettings;
use crate::limits::{MAX_SLOT_MINUTES, MIN_SLOT_MINUTES};

/// Server settings, read from `INTRABOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    /// Login name that acts as the portal administrator.
    pub admin_user: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub engine: EngineSettings,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let slot_minutes = parsed(&lookup, "INTRABOOK_SLOT_MINUTES")?.unwrap_or(30);
        if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&slot_minutes) {
            return Err(ConfigError::OutOfRange("INTRABOOK_SLOT_MINUTES"));
        }
        let offset: i32 = parsed(&lookup, "INTRABOOK_UTC_OFFSET_MINUTES")?.unwrap_or(0);
        if offset.abs() >= 24 * 60 {
            return Err(ConfigError::OutOfRange("INTRABOOK_UTC_OFFSET_MINUTES"));
        }
        let summary_hour: u32 = parsed(&lookup, "INTRABOOK_SUMMARY_HOUR")?.unwrap_or(8);
        if summary_hour > 23 {
            return Err(ConfigError::OutOfRange("INTRABOOK_SUMMARY_HOUR"));
        }

        Ok(Self {
            port: parsed(&lookup, "INTRABOOK_PORT")?.unwrap_or(5433),
            bind: lookup("INTRABOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("INTRABOOK_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            password: lookup("INTRABOOK_PASSWORD").unwrap_or_else(|| "intrabook".into()),
            admin_user: lookup("INTRABOOK_ADMIN_USER").unwrap_or_else(|| "admin".into()),
            max_connections: parsed(&lookup, "INTRABOOK_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&lookup, "INTRABOOK_COMPACT_THRESHOLD")?.unwrap_or(1000),
            engine: EngineSettings {
                calendar: Calendar::with_offset_minutes(offset),
                slot_minutes,
                reminder_lead_minutes: parsed(&lookup, "INTRABOOK_REMINDER_MINUTES")?.unwrap_or(30),
                summary_hour,
            },
            tls_cert: lookup("INTRABOOK_TLS_CERT"),
            tls_key: lookup("INTRABOOK_TLS_KEY"),
            metrics_port: parsed(&lookup, "INTRABOOK_METRICS_PORT")?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
    OutOfRange(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "{key}: cannot parse {value:?}"),
            ConfigError::OutOfRange(key) => write!(f, "{key}: value out of range"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.admin_user, "admin");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.engine, EngineSettings::default());
        assert_eq!(cfg.tls_cert, None);
        assert_eq!(cfg.metrics_port, None);
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("INTRABOOK_PORT", "6000"),
            ("INTRABOOK_BIND", "127.0.0.1"),
            ("INTRABOOK_ADMIN_USER", "root"),
            ("INTRABOOK_SLOT_MINUTES", "15"),
            ("INTRABOOK_UTC_OFFSET_MINUTES", "-300"),
            ("INTRABOOK_REMINDER_MINUTES", "10"),
            ("INTRABOOK_METRICS_PORT", "9100"),
        ])
        .unwrap();
        assert_eq!(cfg.listen_addr(), "127.0.0.1:6000");
        assert_eq!(cfg.admin_user, "root");
        assert_eq!(cfg.engine.slot_minutes, 15);
        assert_eq!(cfg.engine.calendar.offset_minutes(), -300);
        assert_eq!(cfg.engine.reminder_lead_minutes, 10);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn unparsable_value() {
        let err = config(&[("INTRABOOK_PORT", "fast")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "INTRABOOK_PORT",
                value: "fast".into()
            }
        );
    }

    #[test]
    fn slot_granularity_bounds() {
        assert_eq!(
            config(&[("INTRABOOK_SLOT_MINUTES", "1")]).unwrap_err(),
            ConfigError::OutOfRange("INTRABOOK_SLOT_MINUTES")
        );
        assert!(config(&[("INTRABOOK_SLOT_MINUTES", "240")]).is_ok());
    }

    #[test]
    fn offset_bounds() {
        assert!(config(&[("INTRABOOK_UTC_OFFSET_MINUTES", "1440")]).is_err());
        assert!(config(&[("INTRABOOK_UTC_OFFSET_MINUTES", "840")]).is_ok());
    }

    #[test]
    fn summary_hour() {
        assert_eq!(config(&[]).unwrap().engine.summary_hour, 8);
        assert_eq!(config(&[("INTRABOOK_SUMMARY_HOUR", "0")]).unwrap().engine.summary_hour, 0);
        assert_eq!(
            config(&[("INTRABOOK_SUMMARY_HOUR", "24")]).unwrap_err(),
            ConfigError::OutOfRange("INTRABOOK_SUMMARY_HOUR")
        );
    }
}
