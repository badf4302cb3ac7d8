use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3350;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_MAX_JOBS: usize = 1250;
pub const DEFAULT_ENV: &str = "development";
pub const MAX_FRAME_BYTES: usize = 128 * 1024; // 128 KB hard cap per line
pub const DEFAULT_CONFIG_FILE: &str = "postal.toml";

/// Flat variable names honoured for compatibility with older deployments.
const LEGACY_ENV_KEYS: &[&str] = &["PORT", "MAX_JOBS", "ENV", "MAILGUN_DOMAIN", "MAILGUN_API_KEY"];

/// Top-level config (postal.toml + POSTAL_* env overrides).
///
/// Built once at startup and handed to every subsystem behind an `Arc`;
/// nothing mutates it afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostalConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently pending jobs.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
    /// Total send attempts per job. `1` keeps delivery fire-and-forget.
    #[serde(default = "default_dispatch_attempts")]
    pub dispatch_attempts: u32,
    /// Linear backoff step between attempts, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Upper bound on a single transport call.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_jobs: default_max_jobs(),
            dispatch_attempts: default_dispatch_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Location of the pending-jobs snapshot written at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Target environment name; selects the database file.
    #[serde(default = "default_env")]
    pub env: String,
    /// Directory holding the database. Defaults to `_data` next to the executable.
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            env: default_env(),
            data_dir: None,
        }
    }
}

impl StoreConfig {
    pub fn data_dir(&self) -> PathBuf {
        match self.data_dir {
            Some(ref dir) => PathBuf::from(dir),
            None => {
                let base = std::env::current_exe()
                    .ok()
                    .and_then(|p| p.parent().map(|d| d.to_path_buf()))
                    .unwrap_or_else(|| PathBuf::from("."));
                base.join("_data")
            }
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir()
            .join(format!("postal_office-{}.db", self.env))
    }
}

/// Mailgun credentials. Both `domain` and `api_key` must be present for real
/// delivery; otherwise the server falls back to a log-only transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_mail_base_url")]
    pub base_url: String,
    /// Local part of the sender address, e.g. `mailgun` → `mailgun@<domain>`.
    #[serde(default = "default_sender_local_part")]
    pub sender_local_part: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            domain: None,
            api_key: None,
            base_url: default_mail_base_url(),
            sender_local_part: default_sender_local_part(),
        }
    }
}

impl MailConfig {
    /// Returns `(domain, api_key)` when both are configured and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.domain.as_deref(), self.api_key.as_deref()) {
            (Some(d), Some(k)) if !d.is_empty() && !k.is_empty() => Some((d, k)),
            _ => None,
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_max_jobs() -> usize {
    DEFAULT_MAX_JOBS
}
fn default_dispatch_attempts() -> u32 {
    1
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_send_timeout_secs() -> u64 {
    10
}
fn default_env() -> String {
    DEFAULT_ENV.to_string()
}
fn default_mail_base_url() -> String {
    "https://api.mailgun.net/v3".to_string()
}
fn default_sender_local_part() -> String {
    "mailgun".to_string()
}

impl PostalConfig {
    /// Load config from a TOML file with env var overrides.
    ///
    /// Priority (lowest to highest):
    ///   1. built-in defaults
    ///   2. TOML file (explicit path, else `postal.toml` in the cwd)
    ///   3. `POSTAL_*` variables, `__` separating sections
    ///      (`POSTAL_SCHEDULER__MAX_JOBS=10`)
    ///   4. legacy flat variables: PORT, MAX_JOBS, ENV, MAILGUN_DOMAIN, MAILGUN_API_KEY
    ///
    /// A missing default file is skipped; a missing explicit path is an error.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        if let Some(path) = config_path {
            if !Path::new(path).is_file() {
                return Err(crate::error::PostalError::Config(format!(
                    "config file not found: {path}"
                )));
            }
        }
        let path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);
        Self::figment(path)
            .extract()
            .map_err(|e| crate::error::PostalError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(PostalConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("POSTAL_").split("__"))
            .merge(legacy_env())
    }
}

fn legacy_env() -> Env {
    Env::raw()
        .only(LEGACY_ENV_KEYS)
        .map(|key| match key.as_str().to_ascii_lowercase().as_str() {
            "port" => "server.port".into(),
            "max_jobs" => "scheduler.max_jobs".into(),
            "env" => "store.env".into(),
            "mailgun_domain" => "mail.domain".into(),
            "mailgun_api_key" => "mail.api_key".into(),
            other => other.to_string().into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_legacy_values() {
        let cfg = PostalConfig::default();
        assert_eq!(cfg.server.port, 3350);
        assert_eq!(cfg.scheduler.max_jobs, 1250);
        assert_eq!(cfg.scheduler.dispatch_attempts, 1);
        assert_eq!(cfg.store.env, "development");
        assert!(cfg.mail.credentials().is_none());
    }

    #[test]
    fn database_path_uses_env_name() {
        let store = StoreConfig {
            env: "production".into(),
            data_dir: Some("/var/lib/postal".into()),
        };
        assert_eq!(
            store.database_path(),
            PathBuf::from("/var/lib/postal/postal_office-production.db")
        );
    }

    #[test]
    fn toml_and_prefixed_env_merge() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "postal.toml",
                r#"
                [server]
                port = 4000

                [scheduler]
                max_jobs = 5
                "#,
            )?;
            jail.set_env("POSTAL_SCHEDULER__MAX_JOBS", "7");

            let cfg = PostalConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(cfg.server.port, 4000);
            assert_eq!(cfg.scheduler.max_jobs, 7);
            Ok(())
        });
    }

    #[test]
    fn legacy_env_vars_override() {
        Jail::expect_with(|jail| {
            jail.set_env("PORT", "9999");
            jail.set_env("MAX_JOBS", "3");
            jail.set_env("ENV", "staging");
            jail.set_env("MAILGUN_DOMAIN", "mg.example.com");
            jail.set_env("MAILGUN_API_KEY", "key-123");

            let cfg = PostalConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(cfg.server.port, 9999);
            assert_eq!(cfg.scheduler.max_jobs, 3);
            assert_eq!(cfg.store.env, "staging");
            assert_eq!(cfg.mail.credentials(), Some(("mg.example.com", "key-123")));
            Ok(())
        });
    }

    #[test]
    fn no_sources_yield_defaults() {
        Jail::expect_with(|_jail| {
            let cfg = PostalConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(cfg.server.port, DEFAULT_PORT);
            assert_eq!(cfg.scheduler.max_jobs, DEFAULT_MAX_JOBS);
            Ok(())
        });
    }

    #[test]
    fn malformed_env_value_fails_load() {
        Jail::expect_with(|jail| {
            jail.set_env("ENV", "production");
            jail.set_env("MAX_JOBS", "12x");

            assert!(PostalConfig::load(None).is_err());
            Ok(())
        });
    }

    #[test]
    fn missing_explicit_config_file_fails_load() {
        Jail::expect_with(|_jail| {
            assert!(PostalConfig::load(Some("does-not-exist.toml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn explicit_config_file_is_read() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[server]\nport = 4100\n")?;
            let cfg = PostalConfig::load(Some("custom.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.server.port, 4100);
            Ok(())
        });
    }

    #[test]
    fn empty_credentials_are_ignored() {
        let mail = MailConfig {
            domain: Some("mg.example.com".into()),
            api_key: Some(String::new()),
            ..MailConfig::default()
        };
        assert!(mail.credentials().is_none());
    }
}
