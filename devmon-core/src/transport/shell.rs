//! Interactive shell transport
//!
//! Keeps one persistent channel to the device, either a raw telnet-style TCP
//! connection or an `ssh -tt` child process (wrapped in `sshpass -e` when a
//! password is configured). Output is accumulated until the operation's
//! terminator pattern matches. Menu-driven devices are handled by resending
//! the navigation keystroke in a bounded loop.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::ansi::split_blocks;
use super::stream::{Channel, connect_tcp};
use super::{Transport, TransportError, TransportKind, TransportResult, target_name};
use crate::operation::{DEFAULT_MENU_ATTEMPTS, Operation, RawResult, ShellInput, Target};

/// Default timeout for establishing the channel (seconds)
const SHELL_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Silence that ends the stale-output drain before a write
const STALE_QUIET: Duration = Duration::from_millis(20);

/// Upper bound on the stale-output drain
const STALE_LIMIT: Duration = Duration::from_millis(250);

/// Shortest wait between two menu keystroke resends
const MIN_MENU_WAIT: Duration = Duration::from_millis(100);

/// How the channel is established
#[derive(Debug, Clone)]
pub enum ShellLauncher {
    /// Raw TCP with telnet negotiation refused
    Telnet,
    /// Plain TCP, no negotiation
    Raw,
    /// System `ssh` client with a forced PTY
    Ssh {
        /// Optional private key path
        identity_file: Option<String>,
    },
}

/// Interactive shell configuration
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Device address
    pub host: String,
    /// Device port
    pub port: u16,
    /// Channel type
    pub launcher: ShellLauncher,
    /// Account name (used by the ssh launcher)
    pub username: Option<String>,
    /// Account secret (ssh launcher via `sshpass -e`)
    pub password: Option<SecretString>,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl ShellConfig {
    /// Creates a telnet-style configuration
    #[must_use]
    pub fn telnet(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            launcher: ShellLauncher::Telnet,
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(SHELL_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Creates an ssh configuration
    #[must_use]
    pub fn ssh(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            launcher: ShellLauncher::Ssh {
                identity_file: None,
            },
            username: Some(username.into()),
            password: None,
            connect_timeout: Duration::from_secs(SHELL_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Sets the password
    #[must_use]
    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    /// Sets the launcher
    #[must_use]
    pub fn with_launcher(mut self, launcher: ShellLauncher) -> Self {
        self.launcher = launcher;
        self
    }
}

/// Persistent interactive shell channel
///
/// The channel sits behind a mutex, so concurrent callers are serialized
/// and only one operation is ever in flight.
#[derive(Debug)]
pub struct ShellTransport {
    channel: Mutex<Option<Channel>>,
    child: Mutex<Option<Child>>,
}

impl ShellTransport {
    /// Opens the channel
    pub async fn open(config: &ShellConfig) -> TransportResult<Self> {
        match &config.launcher {
            ShellLauncher::Telnet | ShellLauncher::Raw => {
                let stream = connect_tcp(&config.host, config.port, config.connect_timeout).await?;
                let telnet = matches!(config.launcher, ShellLauncher::Telnet);
                tracing::debug!(host = %config.host, port = config.port, telnet, "Shell channel opened");
                Ok(Self::from_channel(Channel::from_tcp(stream, telnet)))
            }
            ShellLauncher::Ssh { identity_file } => {
                let mut child = spawn_ssh(config, identity_file.as_deref())?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| TransportError::Io("ssh stdin unavailable".into()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| TransportError::Io("ssh stdout unavailable".into()))?;
                tracing::debug!(host = %config.host, port = config.port, "Shell ssh process spawned");
                Ok(Self {
                    channel: Mutex::new(Some(Channel::new(
                        Box::new(stdout),
                        Box::new(stdin),
                        false,
                    ))),
                    child: Mutex::new(Some(child)),
                })
            }
        }
    }

    /// Wraps an already established channel
    pub(crate) fn from_channel(channel: Channel) -> Self {
        Self {
            channel: Mutex::new(Some(channel)),
            child: Mutex::new(None),
        }
    }

    /// Wraps any async byte stream, e.g. an in-memory duplex in tests
    pub fn from_stream<S>(stream: S, telnet: bool) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_channel(Channel::new(Box::new(reader), Box::new(writer), telnet))
    }

    async fn exchange(
        channel: &mut Channel,
        input: &ShellInput,
        timeout: Duration,
    ) -> TransportResult<RawResult> {
        let started = Instant::now();
        let deadline = started + timeout;
        let terminator = Regex::new(&input.terminator)
            .map_err(|e| TransportError::InvalidConfig(format!("terminator pattern: {e}")))?;

        // Expect-only steps read output the device already sent, such as a
        // login banner, so nothing may be discarded before them
        if input.lines.is_empty() {
            channel.clear();
        } else {
            channel.discard_pending(STALE_QUIET, STALE_LIMIT).await;
        }

        let (output, matched) = if let Some(ceiling) = input.menu_attempts {
            navigate_menu(channel, input, &terminator, ceiling, deadline).await?
        } else {
            for line in &input.lines {
                channel.write_line(line).await?;
            }
            channel
                .read_until(&terminator, deadline)
                .await
                .map_err(|failure| failure.error)?
        };

        let blocks = match &input.block_boundary {
            Some(boundary) => {
                let boundary = Regex::new(boundary).map_err(|e| {
                    TransportError::InvalidConfig(format!("block boundary pattern: {e}"))
                })?;
                split_blocks(&output, &boundary)
            }
            None => Vec::new(),
        };

        Ok(RawResult {
            body: output,
            matched_terminator: Some(matched),
            blocks,
            elapsed: started.elapsed(),
            ..RawResult::default()
        })
    }
}

/// Resends the final keystroke until the terminator appears.
///
/// Every line but the last is sent once; the last one is the menu digit or
/// command that is repeated. The loop is bounded by `ceiling` and by the
/// operation deadline.
async fn navigate_menu(
    channel: &mut Channel,
    input: &ShellInput,
    terminator: &Regex,
    ceiling: u32,
    deadline: Instant,
) -> TransportResult<(String, String)> {
    let Some((keystroke, preamble)) = input.lines.split_last() else {
        return Err(TransportError::InvalidConfig(
            "menu navigation needs at least one keystroke".into(),
        ));
    };
    let ceiling = if ceiling == 0 { DEFAULT_MENU_ATTEMPTS } else { ceiling };

    for line in preamble {
        channel.write_line(line).await?;
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    let wait = (remaining / ceiling).max(MIN_MENU_WAIT);

    for attempt in 1..=ceiling {
        channel.write_line(keystroke).await?;
        let attempt_deadline = (Instant::now() + wait).min(deadline);
        match channel.read_until(terminator, attempt_deadline).await {
            Ok(found) => {
                tracing::debug!(attempt, "Menu terminator found");
                return Ok(found);
            }
            Err(failure) => match failure.error {
                TransportError::Timeout { .. } if Instant::now() < deadline => {
                    tracing::trace!(attempt, ceiling, "Menu terminator not yet visible, resending");
                }
                TransportError::Timeout { .. } => {
                    return Err(TransportError::TerminatorNotFound { attempts: attempt });
                }
                other => return Err(other),
            },
        }
    }

    Err(TransportError::TerminatorNotFound { attempts: ceiling })
}

fn spawn_ssh(config: &ShellConfig, identity_file: Option<&str>) -> TransportResult<Child> {
    let mut cmd;
    if let Some(password) = &config.password {
        cmd = Command::new("sshpass");
        cmd.arg("-e").arg("ssh");
        cmd.env("SSHPASS", password.expose_secret());
    } else {
        cmd = Command::new("ssh");
        cmd.arg("-o").arg("BatchMode=yes");
    }

    cmd.arg("-tt");
    cmd.arg("-o").arg("StrictHostKeyChecking=no");
    cmd.arg("-o").arg(format!(
        "ConnectTimeout={}",
        config.connect_timeout.as_secs().max(1)
    ));
    if config.port != 22 {
        cmd.arg("-p").arg(config.port.to_string());
    }
    if let Some(key) = identity_file {
        cmd.arg("-i").arg(key);
    }
    let destination = match &config.username {
        Some(user) => format!("{user}@{}", config.host),
        None => config.host.clone(),
    };
    cmd.arg(destination);

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    cmd.spawn()
        .map_err(|e| TransportError::Io(format!("Failed to spawn ssh: {e}")))
}

#[async_trait]
impl Transport for ShellTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Shell
    }

    async fn send(&self, operation: &Operation) -> TransportResult<RawResult> {
        let Target::Shell(input) = &operation.target else {
            return Err(TransportError::UnsupportedTarget {
                transport: TransportKind::Shell,
                target: target_name(operation),
            });
        };

        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or(TransportError::Closed)?;
        Self::exchange(channel, input, operation.timeout()).await
    }

    async fn close(&self) {
        if let Some(mut channel) = self.channel.lock().await.take() {
            channel.shutdown().await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}
