use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use punchcard_core::{CooldownWindow, MatchPolicy, ServerSettings, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

/// Daemon configuration: optional TOML file, then `PUNCHCARD_*` overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub bus: BusKind,
    /// Minimum seconds between two accepted punches for one worker.
    pub cooldown_secs: u64,
    /// Euclidean distance threshold for a positive identity match.
    pub match_threshold: f32,
    pub match_policy: MatchPolicy,
    /// Offset from UTC that defines the shop's calendar day.
    pub utc_offset_minutes: i32,
    /// Unix users whose bus connections count as shop consoles. Every
    /// other caller is treated as a personal device.
    pub console_uids: Vec<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("attendance.db"),
            bus: BusKind::System,
            cooldown_secs: 60,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            match_policy: MatchPolicy::Closest,
            utc_offset_minutes: 0,
            console_uids: vec![0],
        }
    }
}

impl Config {
    /// Load from `$PUNCHCARD_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("PUNCHCARD_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply `PUNCHCARD_*` overrides read through `lookup`.
    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("PUNCHCARD_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PUNCHCARD_BUS") {
            self.bus = match v.as_str() {
                "system" => BusKind::System,
                "session" => BusKind::Session,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "PUNCHCARD_BUS",
                        reason: format!("expected system or session, got {other}"),
                    })
                }
            };
        }
        if let Some(v) = lookup("PUNCHCARD_COOLDOWN_SECS") {
            self.cooldown_secs = parse("PUNCHCARD_COOLDOWN_SECS", &v)?;
        }
        if let Some(v) = lookup("PUNCHCARD_MATCH_THRESHOLD") {
            self.match_threshold = parse("PUNCHCARD_MATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("PUNCHCARD_MATCH_POLICY") {
            self.match_policy = parse("PUNCHCARD_MATCH_POLICY", &v)?;
        }
        if let Some(v) = lookup("PUNCHCARD_UTC_OFFSET_MINUTES") {
            self.utc_offset_minutes = parse("PUNCHCARD_UTC_OFFSET_MINUTES", &v)?;
        }
        if let Some(v) = lookup("PUNCHCARD_CONSOLE_UIDS") {
            self.console_uids = v
                .split(',')
                .map(str::trim)
                .filter(|uid| !uid.is_empty())
                .map(|uid| parse("PUNCHCARD_CONSOLE_UIDS", uid))
                .collect::<Result<_, _>>()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cooldown_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "cooldown_secs",
                reason: "must be at least one second".into(),
            });
        }
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                key: "match_threshold",
                reason: format!("must be positive, got {}", self.match_threshold),
            });
        }
        if self.day_offset().is_none() {
            return Err(ConfigError::Invalid {
                key: "utc_offset_minutes",
                reason: format!("out of range: {}", self.utc_offset_minutes),
            });
        }
        Ok(())
    }

    pub fn cooldown(&self) -> CooldownWindow {
        CooldownWindow::new(Duration::from_secs(self.cooldown_secs))
    }

    /// Timezone that defines "today" for punch-direction resolution.
    pub fn day_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            cooldown_seconds: self.cooldown_secs,
            match_threshold: self.match_threshold,
            match_policy: self.match_policy,
        }
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("punchcard")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cooldown_secs, 60);
        assert_eq!(config.match_threshold, 0.4);
        assert_eq!(config.match_policy, MatchPolicy::Closest);
        assert_eq!(config.bus, BusKind::System);
        assert!(config.db_path.ends_with("punchcard/attendance.db"));
        assert_eq!(config.console_uids, vec![0]);
        assert!(config.validate().is_ok());

        let settings = config.server_settings();
        assert_eq!(settings.cooldown_seconds, 60);
        assert_eq!(settings.match_policy, MatchPolicy::Closest);
        assert_eq!(config.cooldown().duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            cooldown_secs = 90
            match_policy = "first"
            bus = "session"
            "#,
        )
        .unwrap();
        assert_eq!(config.cooldown_secs, 90);
        assert_eq!(config.match_policy, MatchPolicy::First);
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.match_threshold, 0.4);
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        assert!(toml::from_str::<Config>("cooldown = 5").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("PUNCHCARD_DB_PATH", "/var/lib/punchcard/a.db"),
                ("PUNCHCARD_BUS", "session"),
                ("PUNCHCARD_COOLDOWN_SECS", "120"),
                ("PUNCHCARD_MATCH_THRESHOLD", "0.35"),
                ("PUNCHCARD_UTC_OFFSET_MINUTES", "360"),
                ("PUNCHCARD_CONSOLE_UIDS", "0, 1001"),
            ]))
            .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/punchcard/a.db"));
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.cooldown().duration(), Duration::from_secs(120));
        assert_eq!(config.match_threshold, 0.35);
        assert_eq!(config.day_offset(), FixedOffset::east_opt(6 * 3600));
        assert_eq!(config.console_uids, vec![0, 1001]);
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("PUNCHCARD_COOLDOWN_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "PUNCHCARD_COOLDOWN_SECS",
                ..
            }
        ));
        assert!(config
            .apply_overrides(lookup(&[("PUNCHCARD_BUS", "tcp")]))
            .is_err());
        assert!(config
            .apply_overrides(lookup(&[("PUNCHCARD_CONSOLE_UIDS", "0,kiosk")]))
            .is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_offset() {
        let config = Config {
            utc_offset_minutes: 24 * 60,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cooldown() {
        let config = Config {
            cooldown_secs: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "cooldown_secs",
                ..
            })
        ));

        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[("PUNCHCARD_COOLDOWN_SECS", "0")]))
            .unwrap();
        assert!(config.validate().is_err());
    }
}
