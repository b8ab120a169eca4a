use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of the environment variables that override file settings.
pub const ENV_PREFIX: &str = "LABDESK_";

fn default_base_url() -> String {
    "http://127.0.0.1:8000/api/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_stream_timeout_secs() -> u64 {
    300
}
fn default_login_location() -> String {
    "/login".to_string()
}
fn default_public_locations() -> Vec<String> {
    vec!["/login".to_string(), "/register".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Output format of the console log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset (defaults to `info`).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Console output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for daily-rolling log files; console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

/// Token storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `SQLite` database path (defaults to `~/.labdesk/session.db`).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// The configured path, or the per-user default.
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".labdesk").join("session.db")
        })
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend API root every request path is joined to.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for ordinary requests, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Cap on the total time of one streaming chat reply, in seconds, from
    /// sending the request to the last body chunk. Not an idle timeout.
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    /// Location an expired session is sent to.
    #[serde(default = "default_login_location")]
    pub login_location: String,
    /// Locations that never record a post-login return path.
    #[serde(default = "default_public_locations")]
    pub public_locations: Vec<String>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
            login_location: default_login_location(),
            public_locations: default_public_locations(),
            log: LogConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Parses configuration from a YAML string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the YAML is invalid or extraction fails.
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
    }

    /// Loads defaults, then the optional file, then `LABDESK_*` variables
    /// (`__` separates nested keys, e.g. `LABDESK_LOG__LEVEL`).
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if a source cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Returns `true` if `location` is one of the public locations.
    ///
    /// The query string is ignored: `/login?session_expired=true` is public.
    #[must_use]
    pub fn is_public_location(&self, location: &str) -> bool {
        let path = location.split(['?', '#']).next().unwrap_or(location);
        self.public_locations.iter().any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
base_url: "https://lab.example.org/api/v1"
timeout_secs: 10
public_locations: ["/login", "/register", "/forgot-password"]
log:
  level: debug
  format: json
store:
  path: "/tmp/labdesk-test.db"
"#;

    #[test]
    fn test_default_config() {
        let c = Config::default();
        assert_eq!(c.base_url, "http://127.0.0.1:8000/api/v1");
        assert_eq!(c.timeout_secs, 30);
        assert_eq!(c.login_location, "/login");
        assert_eq!(c.public_locations, vec!["/login", "/register"]);
        assert_eq!(c.log.format, LogFormat::Plain);
    }

    #[test]
    fn test_from_yaml_overrides() {
        let c = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(c.base_url, "https://lab.example.org/api/v1");
        assert_eq!(c.timeout_secs, 10);
        assert_eq!(c.log.level, "debug");
        assert_eq!(c.log.format, LogFormat::Json);
        assert_eq!(
            c.store.resolved_path(),
            PathBuf::from("/tmp/labdesk-test.db")
        );
    }

    #[test]
    fn test_from_yaml_defaults_applied() {
        let c = Config::from_yaml("timeout_secs: 5").unwrap();
        assert_eq!(c.timeout_secs, 5);
        assert_eq!(c.stream_timeout_secs, 300); // default preserved
        assert_eq!(c.login_location, "/login");
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("labdesk.yaml", "base_url: \"http://file\"\n")?;
            jail.set_env("LABDESK_BASE_URL", "http://env");
            jail.set_env("LABDESK_LOG__LEVEL", "trace");
            let c = Config::load(Some(Path::new("labdesk.yaml")))?;
            assert_eq!(c.base_url, "http://env");
            assert_eq!(c.log.level, "trace");
            Ok(())
        });
    }

    #[test]
    fn test_is_public_location() {
        let c = Config::default();
        assert!(c.is_public_location("/login"));
        assert!(c.is_public_location("/login?session_expired=true"));
        assert!(c.is_public_location("/register"));
        assert!(!c.is_public_location("/projects"));
        assert!(!c.is_public_location("/login/extra"));
    }
}
