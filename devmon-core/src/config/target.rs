//! Transport section of a device profile

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::params::DeviceParameters;
use crate::poller::Connector;
use crate::transport::{
    CommandConfig, CommandLauncher, CommandTransport, HttpConfig, HttpScheme, HttpTransport,
    ShellConfig, ShellLauncher, ShellTransport, TerminalConfig, TerminalTransport, Transport,
    TransportError, TransportKind, TransportResult,
};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const TELNET_PORT: u16 = 23;
const SSH_PORT: u16 = 22;

/// How channel transports reach the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    /// TCP with telnet negotiation refused
    #[default]
    Telnet,
    /// Plain TCP
    Raw,
    /// System `ssh` client
    Ssh,
    /// Commands run on this host (command transport only)
    Local,
}

const fn default_true() -> bool {
    true
}

const fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// `[target]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Transport family
    pub transport: TransportKind,
    /// Host name or IP
    pub address: String,
    /// Port; the transport default when absent
    #[serde(default)]
    pub port: Option<u16>,
    /// URL scheme (http)
    #[serde(default)]
    pub scheme: HttpScheme,
    /// Verify TLS certificates (http)
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    /// Follow redirects automatically (http); always off for multi-step
    /// logins
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    /// Channel type (shell, command, terminal)
    #[serde(default)]
    pub launcher: LauncherKind,
    /// Private key for the ssh launcher
    #[serde(default)]
    pub identity_file: Option<String>,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl TargetConfig {
    /// Creates a target with defaults for everything but family and address
    #[must_use]
    pub fn new(transport: TransportKind, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
            port: None,
            scheme: HttpScheme::default(),
            tls_verify: true,
            follow_redirects: true,
            launcher: LauncherKind::default(),
            identity_file: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    /// Port used for channel transports
    #[must_use]
    pub fn channel_port(&self, parameters: &DeviceParameters) -> u16 {
        parameters.port.or(self.port).unwrap_or(match self.launcher {
            LauncherKind::Ssh => SSH_PORT,
            LauncherKind::Telnet | LauncherKind::Raw | LauncherKind::Local => TELNET_PORT,
        })
    }

    /// Checks combinations no transport accepts
    pub fn check(&self) -> TransportResult<()> {
        match (self.transport, self.launcher) {
            (TransportKind::Command, LauncherKind::Telnet | LauncherKind::Raw) => {
                Err(TransportError::InvalidConfig(format!(
                    "command transport needs the ssh or local launcher, not {:?}",
                    self.launcher
                )))
            }
            (TransportKind::Shell | TransportKind::Terminal, LauncherKind::Local) => {
                Err(TransportError::InvalidConfig(
                    "the local launcher is only valid for the command transport".into(),
                ))
            }
            (TransportKind::Terminal, LauncherKind::Ssh) => Err(TransportError::InvalidConfig(
                "terminal transport runs over telnet or raw TCP".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Opens the transport described by a `[target]` section
#[derive(Debug, Clone)]
pub struct TransportConnector {
    target: TargetConfig,
    parameters: DeviceParameters,
    manual_redirects: bool,
}

impl TransportConnector {
    /// Creates a connector
    #[must_use]
    pub const fn new(target: TargetConfig, parameters: DeviceParameters) -> Self {
        Self {
            target,
            parameters,
            manual_redirects: false,
        }
    }

    /// Disables automatic redirects regardless of the target setting
    #[must_use]
    pub const fn with_manual_redirects(mut self, manual: bool) -> Self {
        self.manual_redirects = manual;
        self
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.target.connect_timeout_secs)
    }

    fn http(&self) -> TransportResult<HttpTransport> {
        let mut config = HttpConfig::new(self.parameters.address.clone())
            .with_scheme(self.target.scheme)
            .with_tls_verify(self.target.tls_verify)
            .with_follow_redirects(self.target.follow_redirects && !self.manual_redirects);
        if let Some(port) = self.parameters.port.or(self.target.port) {
            config = config.with_port(port);
        }
        config.connect_timeout = self.connect_timeout();
        HttpTransport::open(config)
    }

    async fn shell(&self) -> TransportResult<ShellTransport> {
        let port = self.target.channel_port(&self.parameters);
        let host = self.parameters.address.clone();
        let mut config = match self.target.launcher {
            LauncherKind::Ssh => {
                ShellConfig::ssh(host, port, self.parameters.username.clone())
                    .with_password(self.parameters.password.clone())
                    .with_launcher(ShellLauncher::Ssh {
                        identity_file: self.target.identity_file.clone(),
                    })
            }
            LauncherKind::Raw => ShellConfig::telnet(host, port).with_launcher(ShellLauncher::Raw),
            LauncherKind::Telnet | LauncherKind::Local => ShellConfig::telnet(host, port),
        };
        config.connect_timeout = self.connect_timeout();
        ShellTransport::open(&config).await
    }

    async fn command(&self) -> TransportResult<CommandTransport> {
        let mut config = match self.target.launcher {
            LauncherKind::Local => CommandConfig::local(),
            _ => {
                let mut config = CommandConfig::ssh(
                    self.parameters.address.clone(),
                    self.target.channel_port(&self.parameters),
                )
                .with_username(self.parameters.username.clone())
                .with_password(self.parameters.password.clone());
                config.launcher = CommandLauncher::Ssh {
                    identity_file: self.target.identity_file.clone(),
                };
                config
            }
        };
        config.connect_timeout = self.connect_timeout();
        CommandTransport::open(config).await
    }

    async fn terminal(&self) -> TransportResult<TerminalTransport> {
        let mut config = TerminalConfig::new(
            self.parameters.address.clone(),
            self.target.channel_port(&self.parameters),
        );
        config.telnet = self.target.launcher == LauncherKind::Telnet;
        config.connect_timeout = self.connect_timeout();
        TerminalTransport::open(config).await
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(&self) -> TransportResult<Arc<dyn Transport>> {
        self.target.check()?;
        tracing::debug!(
            transport = %self.target.transport,
            host = %self.parameters.address,
            "Opening transport"
        );
        let transport: Arc<dyn Transport> = match self.target.transport {
            TransportKind::Http => Arc::new(self.http()?),
            TransportKind::Shell => Arc::new(self.shell().await?),
            TransportKind::Command => Arc::new(self.command().await?),
            TransportKind::Terminal => Arc::new(self.terminal().await?),
        };
        Ok(transport)
    }
}
