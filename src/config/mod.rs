use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ConfigError;

fn default_heartbeat() -> i64 {
    60
}
fn default_max_sync_delay() -> i64 {
    120
}
fn default_connect_timeout() -> i64 {
    60
}
fn default_is_slave_statement() -> String {
    "SELECT pg_is_in_recovery()".to_string()
}
fn default_trigger_timeout() -> i64 {
    60
}
fn default_log_level() -> String {
    "error".to_string()
}
fn default_log_file() -> String {
    "/var/log/pgwatch-sentinel/pgwatch-sentinel.log".to_string()
}
fn default_pid_file() -> String {
    "/var/run/pgwatch-sentinel.pid".to_string()
}
fn default_status_file() -> String {
    "/var/run/pgwatch-sentinel.status".to_string()
}
fn default_daemon_user() -> String {
    "nobody".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
}

/// The full configuration tree, loaded from a JSON5 (JSON-with-comments)
/// file via the `config` crate and merged with the defaults below.
///
/// `dbname`, `user`, and `password` have no defaults — their absence after
/// merging is a fatal [`ConfigError::MissingRequired`].
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,

    #[serde(default = "default_heartbeat")]
    pub heartbeat: i64,
    #[serde(default = "default_max_sync_delay")]
    pub max_sync_delay: i64,

    /// Canonical name for the recovery freshness threshold. `min_sync_delay`
    /// is accepted as a deprecated alias (see [`Settings::load`]).
    #[serde(default)]
    pub recover_sync_delay: Option<i64>,
    #[serde(default)]
    pub min_sync_delay: Option<i64>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: i64,
    #[serde(default = "default_is_slave_statement")]
    pub is_slave_statement: String,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub triggers: HashMap<String, String>,
    #[serde(default = "default_trigger_timeout")]
    pub trigger_timeout: i64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
    #[serde(default = "default_status_file")]
    pub status_file: String,
    #[serde(default = "default_daemon_user")]
    pub daemon_user: String,
}

impl Settings {
    /// Loads and validates configuration from a JSON5 file at `path`.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Json5))
            .build()?;

        let mut settings: Settings = raw.try_deserialize()?;
        settings.resolve_recover_sync_delay();
        settings.require_credentials()?;
        settings.validate_log_level()?;
        Ok(settings)
    }

    fn resolve_recover_sync_delay(&mut self) {
        match (self.recover_sync_delay, self.min_sync_delay) {
            (Some(_), Some(_)) => {
                tracing::warn!(
                    "both recover_sync_delay and the deprecated min_sync_delay are set; \
                     recover_sync_delay wins"
                );
            }
            (None, Some(v)) => self.recover_sync_delay = Some(v),
            _ => {}
        }
        if self.recover_sync_delay.is_none() {
            self.recover_sync_delay = Some(60);
        }
    }

    pub fn recover_sync_delay(&self) -> i64 {
        self.recover_sync_delay.unwrap_or(60)
    }

    fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.dbname.is_none() {
            return Err(ConfigError::MissingRequired("dbname"));
        }
        if self.user.is_none() {
            return Err(ConfigError::MissingRequired("user"));
        }
        if self.password.is_none() {
            return Err(ConfigError::MissingRequired("password"));
        }
        Ok(())
    }

    fn validate_log_level(&self) -> Result<(), ConfigError> {
        match self.log_level.as_str() {
            "error" | "info" | "debug" => Ok(()),
            other => Err(ConfigError::UnknownLogLevel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn populates_from_file_with_comments() {
        let file = write_config(
            r#"{
                // trailing comments are fine in json5
                dbname: "app",
                user: "app",
                password: "secret",
                heartbeat: 30,
            }"#,
        );
        let settings = Settings::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.dbname.as_deref(), Some("app"));
        assert_eq!(settings.heartbeat, 30);
        assert_eq!(settings.max_sync_delay, 120);
    }

    #[test]
    fn raises_if_required_missing() {
        let file = write_config(r#"{ "heartbeat": 30 }"#);
        let err = Settings::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("dbname")));
    }

    #[test]
    fn defaults_are_set() {
        let file = write_config(r#"{ "dbname": "a", "user": "b", "password": "c" }"#);
        let settings = Settings::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.heartbeat, 60);
        assert_eq!(settings.max_sync_delay, 120);
        assert_eq!(settings.recover_sync_delay(), 60);
        assert_eq!(settings.connect_timeout, 60);
        assert_eq!(settings.is_slave_statement, "SELECT pg_is_in_recovery()");
        assert_eq!(settings.log_level, "error");
    }

    #[test]
    fn deprecated_min_sync_delay_is_honored_as_alias() {
        let file = write_config(
            r#"{ "dbname": "a", "user": "b", "password": "c", "min_sync_delay": 45 }"#,
        );
        let settings = Settings::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.recover_sync_delay(), 45);
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let file = write_config(
            r#"{ "dbname": "a", "user": "b", "password": "c", "log_level": "verbose" }"#,
        );
        let err = Settings::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLogLevel(_)));
    }
}
