//! Line-oriented terminal transport for menu-driven legacy systems
//!
//! Each operation logs in in-band: the credentials and the navigation
//! keystrokes are concatenated into one outbound stream, and the response is
//! complete once the expected prompt matches. Every operation uses its own
//! connection; the one made by [`TerminalTransport::open`] is reused for the
//! first operation.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::stream::{Channel, connect_tcp};
use super::{Transport, TransportError, TransportKind, TransportResult, target_name};
use crate::operation::{AttachedCredential, Operation, RawResult, Target, TerminalInput};

/// Default timeout for establishing the connection (seconds)
const TERMINAL_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Line-oriented terminal configuration
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Device address
    pub host: String,
    /// Device port
    pub port: u16,
    /// Refuse telnet option negotiation
    pub telnet: bool,
    /// Separator appended to every credential and keystroke
    pub line_ending: String,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl TerminalConfig {
    /// Creates a telnet terminal configuration with `\r` line endings
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            telnet: true,
            line_ending: "\r".into(),
            connect_timeout: Duration::from_secs(TERMINAL_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Line-oriented terminal transport
#[derive(Debug)]
pub struct TerminalTransport {
    config: TerminalConfig,
    idle: Mutex<Option<Channel>>,
}

impl TerminalTransport {
    /// Connects once to verify reachability; the connection is kept for the
    /// first operation
    pub async fn open(config: TerminalConfig) -> TransportResult<Self> {
        let stream = connect_tcp(&config.host, config.port, config.connect_timeout).await?;
        let channel = Channel::from_tcp(stream, config.telnet);
        Ok(Self {
            config,
            idle: Mutex::new(Some(channel)),
        })
    }

    async fn channel(&self) -> TransportResult<Channel> {
        if let Some(channel) = self.idle.lock().await.take() {
            return Ok(channel);
        }
        let stream =
            connect_tcp(&self.config.host, self.config.port, self.config.connect_timeout).await?;
        Ok(Channel::from_tcp(stream, self.config.telnet))
    }

    /// Builds the single outbound stream: credentials first, then keystrokes
    fn outbound(&self, input: &TerminalInput, operation: &Operation) -> TransportResult<Vec<u8>> {
        let ending = self.config.line_ending.as_str();
        let mut stream = String::new();

        if input.send_credentials {
            let Some(AttachedCredential::Login { username, password }) = &operation.credential
            else {
                return Err(TransportError::InvalidConfig(
                    "terminal operation requires login credentials".into(),
                ));
            };
            stream.push_str(username);
            stream.push_str(ending);
            stream.push_str(password.expose_secret());
            stream.push_str(ending);
        }
        for key in &input.keystrokes {
            stream.push_str(key);
            stream.push_str(ending);
        }
        Ok(stream.into_bytes())
    }
}

#[async_trait]
impl Transport for TerminalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Terminal
    }

    async fn send(&self, operation: &Operation) -> TransportResult<RawResult> {
        let Target::Terminal(input) = &operation.target else {
            return Err(TransportError::UnsupportedTarget {
                transport: TransportKind::Terminal,
                target: target_name(operation),
            });
        };
        let prompt = Regex::new(&input.expect_prompt)
            .map_err(|e| TransportError::InvalidConfig(format!("expected prompt pattern: {e}")))?;
        let outbound = self.outbound(input, operation)?;

        let started = Instant::now();
        let deadline = started + operation.timeout();
        let mut channel = self.channel().await?;

        channel.write_all(&outbound).await?;
        let result = channel.read_until(&prompt, deadline).await;
        channel.shutdown().await;

        let (body, matched) = result.map_err(|failure| {
            tracing::debug!(
                operation = %operation.name,
                received = failure.output.len(),
                "Expected prompt not seen"
            );
            failure.error
        })?;

        Ok(RawResult {
            body,
            matched_terminator: Some(matched),
            elapsed: started.elapsed(),
            ..RawResult::default()
        })
    }

    async fn close(&self) {
        if let Some(mut channel) = self.idle.lock().await.take() {
            channel.shutdown().await;
        }
    }
}
