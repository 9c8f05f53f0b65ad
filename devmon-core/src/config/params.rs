//! Device parameters: where credentials and addresses come from

use std::collections::BTreeMap;

use secrecy::SecretString;

use super::{ConfigError, ConfigResult, DeviceConfig};
use crate::session::Credentials;
use crate::variables::{Variables, names};

/// Environment variable overriding the configured password
pub const PASSWORD_ENV: &str = "DEVMON_PASSWORD";

/// Everything needed to reach and log into one device
#[derive(Debug, Clone)]
pub struct DeviceParameters {
    /// Account name
    pub username: String,
    /// Account secret
    pub password: SecretString,
    /// Device address
    pub address: String,
    /// Device port, when not the transport default
    pub port: Option<u16>,
    /// Free-form options, exposed to operations as `${name}`
    pub options: BTreeMap<String, String>,
}

impl DeviceParameters {
    /// Creates parameters without options
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            username: username.into(),
            password,
            address: address.into(),
            port: None,
            options: BTreeMap::new(),
        }
    }

    /// Sets the port
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Adds an option
    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    /// Login credentials
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    /// `${address}` plus every option
    #[must_use]
    pub fn variables(&self) -> Variables {
        let mut vars = Variables::new();
        vars.set(names::ADDRESS, self.address.clone());
        for (name, value) in &self.options {
            vars.set(name.clone(), value.clone());
        }
        vars
    }
}

/// Source of device parameters
pub trait ParameterProvider: Send + Sync {
    /// Resolves the parameters for one cycle
    fn resolve(&self) -> ConfigResult<DeviceParameters>;
}

/// Fixed parameters
#[derive(Debug, Clone)]
pub struct StaticParameters(DeviceParameters);

impl StaticParameters {
    /// Wraps fixed parameters
    #[must_use]
    pub const fn new(parameters: DeviceParameters) -> Self {
        Self(parameters)
    }
}

impl ParameterProvider for StaticParameters {
    fn resolve(&self) -> ConfigResult<DeviceParameters> {
        Ok(self.0.clone())
    }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Parameters read from a device profile, with the password overridable
/// from [`PASSWORD_ENV`]
pub struct ConfigParameters {
    config: DeviceConfig,
    env: EnvLookup,
}

impl std::fmt::Debug for ConfigParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigParameters")
            .field("device", &self.config.name)
            .finish_non_exhaustive()
    }
}

impl ConfigParameters {
    /// Reads parameters from `config` and the process environment
    #[must_use]
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_env(config, |name| std::env::var(name).ok())
    }

    /// Reads parameters from `config` and a custom environment
    #[must_use]
    pub fn with_env(
        config: DeviceConfig,
        env: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            env: Box::new(env),
        }
    }
}

impl ParameterProvider for ConfigParameters {
    fn resolve(&self) -> ConfigResult<DeviceParameters> {
        let target = &self.config.target;
        if target.address.trim().is_empty() {
            return Err(ConfigError::Invalid("target.address is empty".into()));
        }

        let password = match (self.env)(PASSWORD_ENV) {
            Some(from_env) if !from_env.is_empty() => {
                tracing::debug!(source = PASSWORD_ENV, "Password taken from environment");
                SecretString::from(from_env)
            }
            _ => self
                .config
                .credentials
                .password
                .clone()
                .unwrap_or_else(|| SecretString::from(String::new())),
        };

        Ok(DeviceParameters {
            username: self.config.credentials.username.clone(),
            password,
            address: target.address.clone(),
            port: target.port,
            options: self.config.options.vars.clone(),
        })
    }
}
