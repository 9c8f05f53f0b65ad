//! Structured remote command transport
//!
//! Runs one command per operation through the system `ssh` client (or
//! `sshpass -e ssh` for password-authenticated devices). This uses a fresh
//! process per command rather than an interactive channel, so stdout, stderr
//! and the exit status come back as separate fields.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tokio::time::Instant;

use super::stream::millis;
use super::{Transport, TransportError, TransportKind, TransportResult, target_name};
use crate::operation::{Operation, RawResult, Target};

/// Default connection timeout handed to `ssh` (seconds)
const SSH_CONNECT_TIMEOUT_SECS: u64 = 5;

/// `sshpass` exit status for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// Exit status `ssh` reserves for its own failures
const SSH_ERROR_EXIT: i32 = 255;

/// Where commands run
#[derive(Debug, Clone)]
pub enum CommandLauncher {
    /// On the device, via `ssh`
    Ssh {
        /// Optional private key path
        identity_file: Option<String>,
    },
    /// On this host via `sh -c` (local agents, tests)
    Local,
}

/// Structured command configuration
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Device address
    pub host: String,
    /// Device port
    pub port: u16,
    /// Account name
    pub username: Option<String>,
    /// Account secret for `sshpass`
    pub password: Option<SecretString>,
    /// Execution mode
    pub launcher: CommandLauncher,
    /// Connection timeout handed to `ssh`
    pub connect_timeout: Duration,
}

impl CommandConfig {
    /// Creates an ssh configuration
    #[must_use]
    pub fn ssh(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            launcher: CommandLauncher::Ssh {
                identity_file: None,
            },
            connect_timeout: Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Creates a local configuration
    #[must_use]
    pub fn local() -> Self {
        Self {
            host: "localhost".into(),
            port: 0,
            username: None,
            password: None,
            launcher: CommandLauncher::Local,
            connect_timeout: Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Sets the account name
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password
    #[must_use]
    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }
}

/// Structured remote command transport
#[derive(Debug)]
pub struct CommandTransport {
    config: CommandConfig,
    use_sshpass: bool,
}

impl CommandTransport {
    /// Prepares the transport.
    ///
    /// No connection is held open; `sshpass` availability is checked once
    /// here rather than on every command.
    pub async fn open(config: CommandConfig) -> TransportResult<Self> {
        let use_sshpass = match (&config.launcher, &config.password) {
            (CommandLauncher::Ssh { .. }, Some(_)) => Command::new("sshpass")
                .arg("-V")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .is_ok(),
            _ => false,
        };
        if config.password.is_some() && !use_sshpass {
            tracing::warn!(
                host = %config.host,
                "sshpass not available, falling back to key-based ssh"
            );
        }
        Ok(Self {
            config,
            use_sshpass,
        })
    }

    fn build(&self, command: &str) -> Command {
        let mut cmd;
        match &self.config.launcher {
            CommandLauncher::Local => {
                cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
            }
            CommandLauncher::Ssh { identity_file } => {
                if self.use_sshpass {
                    cmd = Command::new("sshpass");
                    cmd.arg("-e").arg("ssh");
                    if let Some(ref pw) = self.config.password {
                        cmd.env("SSHPASS", pw.expose_secret());
                    }
                } else {
                    cmd = Command::new("ssh");
                    cmd.arg("-o").arg("BatchMode=yes");
                }
                cmd.arg("-o").arg("StrictHostKeyChecking=no");
                cmd.arg("-o").arg(format!(
                    "ConnectTimeout={}",
                    self.config.connect_timeout.as_secs().max(1)
                ));
                if self.config.port != 22 {
                    cmd.arg("-p").arg(self.config.port.to_string());
                }
                if let Some(key) = identity_file {
                    cmd.arg("-i").arg(key);
                }
                let destination = match &self.config.username {
                    Some(user) => format!("{user}@{}", self.config.host),
                    None => self.config.host.clone(),
                };
                cmd.arg(destination).arg(command);
            }
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn is_ssh(&self) -> bool {
        matches!(self.config.launcher, CommandLauncher::Ssh { .. })
    }
}

/// Recognizes authentication failures reported by `ssh`/`sshpass`
fn is_credential_rejection(exit_code: i32, stderr: &str) -> bool {
    exit_code == SSHPASS_BAD_PASSWORD
        || (exit_code == SSH_ERROR_EXIT
            && (stderr.contains("Permission denied") || stderr.contains("Authentication failed")))
}

#[async_trait]
impl Transport for CommandTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Command
    }

    async fn send(&self, operation: &Operation) -> TransportResult<RawResult> {
        let Target::Command(remote) = &operation.target else {
            return Err(TransportError::UnsupportedTarget {
                transport: TransportKind::Command,
                target: target_name(operation),
            });
        };

        let started = Instant::now();
        let mut cmd = self.build(&remote.command);

        let output = match tokio::time::timeout(operation.timeout(), cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(TransportError::Io(format!("Failed to spawn command: {e}")));
            }
            Err(_) => {
                return Err(TransportError::Timeout {
                    after_ms: millis(started.elapsed()),
                    received: 0,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Killed by a signal: no exit code
        let exit_code = output.status.code().unwrap_or(-1);

        if self.is_ssh() && is_credential_rejection(exit_code, &stderr) {
            return Err(TransportError::CredentialRejected(stderr.trim().to_string()));
        }

        tracing::debug!(
            operation = %operation.name,
            exit_code,
            stdout_bytes = stdout.len(),
            "Remote command finished"
        );

        Ok(RawResult {
            body: stdout,
            exit_code: Some(exit_code),
            stderr: Some(stderr),
            elapsed: started.elapsed(),
            ..RawResult::default()
        })
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_rejection_detection() {
        assert!(is_credential_rejection(5, ""));
        assert!(is_credential_rejection(
            255,
            "admin@10.0.0.1: Permission denied (publickey,password)."
        ));
        assert!(!is_credential_rejection(255, "Connection timed out"));
        assert!(!is_credential_rejection(1, "Permission denied"));
    }

    #[tokio::test]
    async fn test_local_command_separates_streams() {
        let transport = CommandTransport::open(CommandConfig::local()).await.unwrap();
        let op = Operation::command("probe", "echo out; echo err >&2; exit 3");
        let result = transport.send(&op).await.unwrap();

        assert_eq!(result.body.trim(), "out");
        assert_eq!(result.stderr.as_deref().map(str::trim), Some("err"));
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_local_command_timeout() {
        let transport = CommandTransport::open(CommandConfig::local()).await.unwrap();
        let op = Operation::command("slow", "sleep 5").with_timeout(Duration::from_millis(100));
        let err = transport.send(&op).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { received: 0, .. }));
    }
}
