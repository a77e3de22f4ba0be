//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/ampere/config.toml)
//! 3. Environment variables (AMPERE_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "AMPERE";

/// Default timeout for synchronous calls, in milliseconds
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5000;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the WebSocket server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Default timeout for synchronous calls
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Secret used to sign store and session tokens
    #[serde(default)]
    pub secret_key: Option<String>,

    /// File holding the signing secret (used when `secret_key` is unset)
    #[serde(default)]
    pub secret_key_file: Option<PathBuf>,

    /// Session keys exposed to clients
    #[serde(default)]
    pub session_whitelist: Vec<String>,

    /// Maximum concurrent connections (0 = unlimited)
    #[serde(default)]
    pub max_connections: usize,

    /// Directory for client-side data (persisted store tokens)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level for the CLI
    #[serde(default)]
    pub log_level: Option<String>,

    /// Static ambient session served by the CLI server
    #[serde(default)]
    pub session: BTreeMap<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            secret_key: None,
            secret_key_file: None,
            session_whitelist: Vec::new(),
            max_connections: 0,
            data_dir: default_data_dir(),
            log_level: None,
            session: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (AMPERE_BIND_ADDR, AMPERE_CALL_TIMEOUT_MS, ...)
    /// 2. Config file (~/.config/ampere/config.toml or AMPERE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(cli_path: Option<&PathBuf>) -> Result<Self> {
        match cli_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from `path`, then apply environment overrides
    ///
    /// A missing file means defaults.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .with_context(|| format!("Invalid config file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read config file {}", path.display()))
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse TOML text, then apply environment overrides
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config = Self::parse(toml_content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn parse(toml_content: &str) -> Result<Self> {
        toml::from_str(toml_content).context("Config is not valid TOML")
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_BIND_ADDR", ENV_PREFIX)) {
            if !val.is_empty() {
                self.bind_addr = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_CALL_TIMEOUT_MS", ENV_PREFIX)) {
            match val.parse() {
                Ok(ms) => self.call_timeout_ms = ms,
                Err(_) => tracing::warn!(value = %val, "Ignoring invalid AMPERE_CALL_TIMEOUT_MS"),
            }
        }

        // Empty string clears it
        if let Ok(val) = std::env::var(format!("{}_SECRET_KEY", ENV_PREFIX)) {
            self.secret_key = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            self.log_level = if val.is_empty() { None } else { Some(val) };
        }
    }

    /// Default timeout for synchronous calls
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Resolve the signing secret
    ///
    /// Returns `None` when neither `secret_key` nor `secret_key_file` is set.
    pub fn secret(&self) -> Result<Option<Vec<u8>>> {
        if let Some(ref key) = self.secret_key {
            return Ok(Some(key.as_bytes().to_vec()));
        }

        let Some(ref path) = self.secret_key_file else {
            return Ok(None);
        };

        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read secret key file: {:?}", path))?;
        let trimmed = String::from_utf8_lossy(&content).trim().to_string();
        if trimmed.is_empty() {
            anyhow::bail!("Secret key file is empty: {:?}", path);
        }
        Ok(Some(trimmed.into_bytes()))
    }

    /// Write configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Write configuration to `config_path`, creating parent directories
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Cannot serialize config")?;
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;
        }
        std::fs::write(config_path, content)
            .with_context(|| format!("Cannot write config file {}", config_path.display()))
    }

    /// Config file location, `AMPERE_CONFIG` if set
    pub fn config_file_path() -> PathBuf {
        match std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ampere")
                .join("config.toml"),
        }
    }

    /// Get the directory holding persisted client store tokens
    pub fn token_dir(&self) -> PathBuf {
        self.data_dir.join("tokens")
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8765".to_string()
}

fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ampere")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "AMPERE_BIND_ADDR",
        "AMPERE_CALL_TIMEOUT_MS",
        "AMPERE_SECRET_KEY",
        "AMPERE_DATA_DIR",
        "AMPERE_LOG_LEVEL",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.call_timeout_ms, 5000);
        assert_eq!(config.call_timeout(), Duration::from_millis(5000));
        assert!(config.secret_key.is_none());
        assert!(config.session_whitelist.is_empty());
        assert!(config.data_dir.ends_with("ampere"));
    }

    #[test]
    fn test_env_override_timeout() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("AMPERE_CALL_TIMEOUT_MS", "250");
        config.apply_env_overrides();
        assert_eq!(config.call_timeout_ms, 250);

        // Garbage is ignored
        env::set_var("AMPERE_CALL_TIMEOUT_MS", "soon");
        config.apply_env_overrides();
        assert_eq!(config.call_timeout_ms, 250);
    }

    #[test]
    fn test_env_override_secret() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("AMPERE_SECRET_KEY", "hunter2");
        config.apply_env_overrides();
        assert_eq!(config.secret().unwrap(), Some(b"hunter2".to_vec()));

        env::set_var("AMPERE_SECRET_KEY", "");
        config.apply_env_overrides();
        assert!(config.secret_key.is_none());
        assert_eq!(config.secret().unwrap(), None);
    }

    #[test]
    fn test_secret_from_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "  file-secret\n").unwrap();

        let config = Config {
            secret_key_file: Some(path),
            ..Config::default()
        };
        assert_eq!(config.secret().unwrap(), Some(b"file-secret".to_vec()));
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            bind_addr = "0.0.0.0:9000"
            call_timeout_ms = 1500
            session_whitelist = ["user_id", "locale"]

            [session]
            user_id = 42
            locale = "en"
            password_hash = "nope"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.call_timeout_ms, 1500);
        assert_eq!(config.session_whitelist, vec!["user_id", "locale"]);
        assert_eq!(config.session.get("user_id"), Some(&serde_json::json!(42)));
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            bind_addr: "127.0.0.1:1".to_string(),
            call_timeout_ms: 42,
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.bind_addr, "127.0.0.1:1");
        assert_eq!(loaded.call_timeout_ms, 42);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.call_timeout_ms, DEFAULT_CALL_TIMEOUT_MS);
    }
}
