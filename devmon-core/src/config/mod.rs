//! Device profiles
//!
//! A device profile is a TOML file describing how to reach a device, how to
//! log in and what to collect. [`ConfigManager`] finds and loads profiles;
//! [`DeviceConfig`] turns one into a transport connector and a collection
//! plan.

mod params;
mod profile;
mod target;

pub use params::{
    ConfigParameters, DeviceParameters, PASSWORD_ENV, ParameterProvider, StaticParameters,
};
pub use profile::{ProfileConfig, ReadingConfig, ReadingSource, Stage, TableConfig};
pub use target::{LauncherKind, TargetConfig, TransportConnector};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::ClassifiedError;
use crate::executor::DEFAULT_CONCURRENCY;
use crate::operation::Operation;
use crate::session::AuthStrategy;
use crate::tracing::span_names;
use crate::transport::TransportKind;

/// Directory name below the platform config directory
pub const CONFIG_DIR_NAME: &str = "devmon";

/// Sub-directory holding device profiles
pub const PROFILES_DIR_NAME: &str = "devices";

/// Errors raised while loading or checking a profile
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The platform has no config directory
    #[error("Cannot determine the configuration directory")]
    NoConfigDir,

    /// No profile under that name or path
    #[error("Device profile not found: {0}")]
    NotFound(PathBuf),

    /// Reading or writing a profile failed
    #[error("I/O error: {0}")]
    Io(String),

    /// The profile is not valid TOML for a device
    #[error("Failed to parse {path}: {reason}")]
    Parse {
        /// Profile path
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// The profile could not be written
    #[error("Failed to serialize profile: {0}")]
    Serialize(String),

    /// The profile parses but cannot work
    #[error("Invalid profile: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Configuration problems are never caused by the device
    #[must_use]
    pub fn classified(&self) -> ClassifiedError {
        ClassifiedError::generic(self.to_string())
    }
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// `[credentials]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Account name
    #[serde(default)]
    pub username: String,
    /// Account secret; prefer the environment override
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
}

const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// `[options]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsConfig {
    /// Operations in flight during fan-out
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Extra variables available to operations as `${name}`
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            vars: BTreeMap::new(),
        }
    }
}

/// A complete device profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name used in logs and reports
    #[serde(default)]
    pub name: String,
    /// How to reach the device
    pub target: TargetConfig,
    /// Login account
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Tuning and variables
    #[serde(default)]
    pub options: OptionsConfig,
    /// Login strategy
    #[serde(default)]
    pub auth: AuthStrategy,
    /// Validation probe
    pub probe: Operation,
    /// Record discovery
    #[serde(default)]
    pub discover: Option<Stage>,
    /// Per-record enrichment
    #[serde(default)]
    pub detail: Option<Stage>,
    /// Scalar readings
    #[serde(default)]
    pub readings: Vec<ReadingConfig>,
    /// Table output
    #[serde(default)]
    pub table: Option<TableConfig>,
}

impl DeviceConfig {
    /// Parses a profile from TOML text
    pub fn from_toml(content: &str, path: &Path) -> ConfigResult<Self> {
        let mut config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if config.name.is_empty() {
            config.name = path
                .file_stem()
                .map_or_else(|| config.target.address.clone(), |s| s.to_string_lossy().into_owned());
        }
        Ok(config)
    }

    /// Checks combinations that cannot work
    pub fn validate(&self) -> ConfigResult<()> {
        if self.target.address.trim().is_empty() {
            return Err(ConfigError::Invalid("target.address is empty".into()));
        }
        self.target
            .check()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if !matches!(self.auth, AuthStrategy::Stateless) && self.credentials.username.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "auth strategy '{}' needs credentials.username",
                self.auth.name()
            )));
        }
        if matches!(self.auth, AuthStrategy::Prompt { .. })
            && self.target.transport != TransportKind::Shell
        {
            return Err(ConfigError::Invalid(
                "prompt login needs the shell transport".into(),
            ));
        }
        if matches!(self.auth, AuthStrategy::MultiStep(_))
            && self.target.transport != TransportKind::Http
        {
            return Err(ConfigError::Invalid(
                "multi-step login needs the http transport".into(),
            ));
        }

        if self.discover.is_none() {
            if self.detail.is_some() {
                return Err(ConfigError::Invalid("[detail] needs [discover]".into()));
            }
            if self.table.is_some() {
                return Err(ConfigError::Invalid("[table] needs [discover]".into()));
            }
            if self.readings.iter().any(|r| r.query.is_none()) {
                return Err(ConfigError::Invalid(
                    "readings without a query need [discover]".into(),
                ));
            }
        }
        if let Some(table) = &self.table {
            if table.columns.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "table '{}' has no columns",
                    table.id
                )));
            }
        }
        if self.options.concurrency == 0 {
            return Err(ConfigError::Invalid("options.concurrency must be > 0".into()));
        }
        Ok(())
    }

    /// The collection plan, with `${address}` and option variables
    #[must_use]
    pub fn profile(&self, parameters: &DeviceParameters) -> ProfileConfig {
        ProfileConfig {
            auth: self.auth.clone(),
            probe: self.probe.clone(),
            discover: self.discover.clone(),
            detail: self.detail.clone(),
            readings: self.readings.clone(),
            table: self.table.clone(),
            variables: parameters.variables(),
        }
    }

    /// Connector for the `[target]` section
    #[must_use]
    pub fn connector(&self, parameters: DeviceParameters) -> TransportConnector {
        TransportConnector::new(self.target.clone(), parameters)
            .with_manual_redirects(matches!(self.auth, AuthStrategy::MultiStep(_)))
    }
}

/// Finds, loads and saves device profiles
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Uses `<platform config dir>/devmon`
    pub fn new() -> ConfigResult<Self> {
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::with_config_dir(base.join(CONFIG_DIR_NAME)))
    }

    /// Uses a custom directory
    #[must_use]
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Configuration directory
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Directory holding device profiles
    #[must_use]
    pub fn profiles_dir(&self) -> PathBuf {
        self.config_dir.join(PROFILES_DIR_NAME)
    }

    /// Resolves a profile reference: an existing path is used as is,
    /// anything else names `<profiles dir>/<name>.toml`
    #[must_use]
    pub fn resolve(&self, reference: &str) -> PathBuf {
        let direct = PathBuf::from(reference);
        if direct.is_file() {
            return direct;
        }
        self.profiles_dir().join(format!("{reference}.toml"))
    }

    /// Loads and validates a profile
    pub fn load_device(&self, reference: &str) -> ConfigResult<DeviceConfig> {
        let path = self.resolve(reference);
        let span = tracing::debug_span!(span_names::CONFIG_LOAD, path = %path.display());
        let _enter = span.enter();

        if !path.is_file() {
            return Err(ConfigError::NotFound(path));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config = DeviceConfig::from_toml(&content, &path)?;
        config.validate()?;
        tracing::debug!(device = %config.name, transport = %config.target.transport, "Profile loaded");
        Ok(config)
    }

    /// Writes a profile under the profiles directory; the password is never
    /// written
    pub fn save_device(&self, name: &str, config: &DeviceConfig) -> ConfigResult<PathBuf> {
        let dir = self.profiles_dir();
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::Io(e.to_string()))?;
        let content =
            toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        let path = dir.join(format!("{name}.toml"));
        std::fs::write(&path, content).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(path)
    }

    /// Names of the stored profiles, sorted
    pub fn list_devices(&self) -> ConfigResult<Vec<String>> {
        let dir = self.profiles_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = std::fs::read_dir(&dir)
            .map_err(|e| ConfigError::Io(e.to_string()))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Encoding;
    use crate::operation::Target;
    use tempfile::TempDir;

    const FULL_PROFILE: &str = r#"
        [target]
        transport = "http"
        address = "192.0.2.1"
        scheme = "https"
        tls_verify = false

        [credentials]
        username = "monitor"

        [options]
        concurrency = 2
        vars = { site = "ams" }

        [auth]
        strategy = "single_call"
        extractor = { kind = "json_pointer", pointer = "/token" }
        present = { kind = "bearer" }
        [auth.request]
        name = "login"
        target = { kind = "http", method = "POST", path = "/api/login", body = '{"u":"${username}","p":"${password}"}' }

        [probe]
        name = "system"
        target = { kind = "http", path = "/api/system" }

        [discover.operation]
        name = "ports"
        target = { kind = "http", path = "/api/ports" }
        retries = 2
        backoff = { kind = "fixed", delay_ms = 500 }

        [discover.normalize]
        format = "json"
        items = "items"
        [[discover.normalize.fields]]
        name = "id"
        required = true
        [[discover.normalize.fields]]
        name = "speed"
        kind = "number"

        [[readings]]
        label = "Ports"
        source = { from = "count" }

        [table]
        id = "ports"
        key = "id"
        columns = ["id", "speed"]
    "#;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let devices = dir.path().join(PROFILES_DIR_NAME);
        std::fs::create_dir_all(&devices).unwrap();
        let path = devices.join(format!("{name}.toml"));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_full_profile() {
        let dir = TempDir::new().unwrap();
        write(&dir, "edge", FULL_PROFILE);
        let manager = ConfigManager::with_config_dir(dir.path());

        let config = manager.load_device("edge").unwrap();
        assert_eq!(config.name, "edge");
        assert_eq!(config.options.concurrency, 2);
        assert_eq!(config.auth.name(), "single_call");
        let discover = config.discover.as_ref().unwrap();
        assert_eq!(discover.operation.max_attempts(), 3);
        assert!(matches!(discover.normalize.encoding, Encoding::Json { .. }));
        assert!(matches!(config.probe.target, Target::Http(_)));
        assert_eq!(manager.list_devices().unwrap(), vec!["edge".to_string()]);
    }

    #[test]
    fn test_load_by_path() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "core", FULL_PROFILE);
        let manager = ConfigManager::with_config_dir("/nonexistent");
        let config = manager.load_device(path.to_str().unwrap()).unwrap();
        assert_eq!(config.name, "core");
    }

    #[test]
    fn test_missing_profile() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_config_dir(dir.path());
        assert!(matches!(
            manager.load_device("nope"),
            Err(ConfigError::NotFound(_))
        ));
        assert!(manager.list_devices().unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken", "[target\naddress=");
        let err = ConfigManager::with_config_dir(dir.path())
            .load_device("broken")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_table_without_discover_rejected() {
        let content = r#"
            [target]
            transport = "http"
            address = "x"
            [probe]
            target = { kind = "http", path = "/" }
            [table]
            id = "t"
            key = "id"
            columns = ["id"]
        "#;
        let config = DeviceConfig::from_toml(content, Path::new("t.toml")).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_prompt_login_needs_shell() {
        let content = r#"
            [target]
            transport = "http"
            address = "x"
            [credentials]
            username = "u"
            [auth]
            strategy = "prompt"
            steps = [{ expect = "ogin:" }]
            [probe]
            target = { kind = "http", path = "/" }
        "#;
        let config = DeviceConfig::from_toml(content, Path::new("p.toml")).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_skips_password() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_config_dir(dir.path());
        let mut config = DeviceConfig::from_toml(FULL_PROFILE, Path::new("edge.toml")).unwrap();
        config.credentials.password = Some(SecretString::from("hunter2"));

        let path = manager.save_device("edge", &config).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("hunter2"));

        let reloaded = manager.load_device("edge").unwrap();
        assert_eq!(reloaded.table, config.table);
        assert_eq!(reloaded.probe, config.probe);
        assert!(reloaded.credentials.password.is_none());
    }
}
