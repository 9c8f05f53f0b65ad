//! Byte channels shared by the shell and terminal transports

use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};

use super::ansi::{strip_control_sequences, strip_telnet_negotiation};
use super::{TransportError, TransportResult};

const READ_CHUNK: usize = 4096;

/// Opens a TCP connection with a deadline.
///
/// Connection errors are mapped onto the transport taxonomy the same way for
/// every channel-based transport.
pub async fn connect_tcp(host: &str, port: u16, limit: Duration) -> TransportResult<TcpStream> {
    let addr = format!("{host}:{port}");

    match timeout(limit, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => {
            let error_str = e.to_string().to_lowercase();
            if error_str.contains("refused") {
                Err(TransportError::ConnectionRefused(addr))
            } else if error_str.contains("no route")
                || error_str.contains("unreachable")
                || error_str.contains("network is down")
                || error_str.contains("name or service not known")
                || error_str.contains("no such host")
                || error_str.contains("failed to lookup")
                || error_str.contains("resolve")
            {
                Err(TransportError::Unreachable(addr))
            } else {
                Err(TransportError::Io(e.to_string()))
            }
        }
        Err(_) => Err(TransportError::Timeout {
            after_ms: millis(limit),
            received: 0,
        }),
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Outcome of a pattern wait that did not match
#[derive(Debug)]
pub(crate) struct WaitFailure {
    /// Cleaned output accumulated so far
    pub output: String,
    /// The underlying error (timeout or closed channel)
    pub error: TransportError,
}

/// A bidirectional byte channel with pattern-driven reads
pub(crate) struct Channel {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    telnet: bool,
    raw: Vec<u8>,
}

impl Channel {
    /// Wraps a split stream. With `telnet` set, IAC negotiation is refused
    /// and stripped from the output.
    pub fn new(
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        telnet: bool,
    ) -> Self {
        Self {
            reader,
            writer,
            telnet,
            raw: Vec::new(),
        }
    }

    /// Wraps a TCP stream
    pub fn from_tcp(stream: TcpStream, telnet: bool) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(Box::new(reader), Box::new(writer), telnet)
    }

    /// Writes bytes and flushes
    pub async fn write_all(&mut self, data: &[u8]) -> TransportResult<()> {
        self.writer
            .write_all(data)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// Writes one line followed by `\r\n`
    pub async fn write_line(&mut self, line: &str) -> TransportResult<()> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.write_all(&data).await
    }

    /// Discards output buffered from earlier exchanges
    pub fn clear(&mut self) {
        self.raw.clear();
    }

    /// Reads and drops whatever the device sends until it stays silent for
    /// `quiet`, giving up after `limit`. Late output of a timed-out exchange
    /// must not satisfy the next one. A closed channel is left for the next
    /// read to report.
    pub async fn discard_pending(&mut self, quiet: Duration, limit: Duration) {
        let until = Instant::now() + limit;
        let mut chunk = [0u8; READ_CHUNK];
        let mut dropped = 0usize;

        loop {
            let window = (Instant::now() + quiet).min(until);
            match timeout_at(window, self.reader.read(&mut chunk)).await {
                Ok(Ok(n)) if n > 0 => {
                    if self.absorb(&chunk[..n]).await.is_err() {
                        break;
                    }
                    dropped += n;
                    if Instant::now() >= until {
                        break;
                    }
                }
                _ => break,
            }
        }
        self.raw.clear();
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "Discarded stale channel output");
        }
    }

    async fn absorb(&mut self, data: &[u8]) -> TransportResult<()> {
        if self.telnet {
            let (data, replies) = strip_telnet_negotiation(data);
            if !replies.is_empty() {
                self.write_all(&replies).await?;
            }
            self.raw.extend_from_slice(&data);
        } else {
            self.raw.extend_from_slice(data);
        }
        Ok(())
    }

    /// Cleaned view of everything read since the last [`Channel::clear`]
    pub fn output(&self) -> String {
        strip_control_sequences(&String::from_utf8_lossy(&self.raw))
    }

    /// Reads until `pattern` matches the cleaned output or `deadline` passes.
    ///
    /// On success returns the cleaned output and the matched text.
    pub async fn read_until(
        &mut self,
        pattern: &Regex,
        deadline: Instant,
    ) -> Result<(String, String), WaitFailure> {
        let started = Instant::now();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let output = self.output();
            if let Some(found) = pattern.find(&output) {
                let matched = found.as_str().to_string();
                return Ok((output, matched));
            }

            let read = match timeout_at(deadline, self.reader.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(WaitFailure {
                        output,
                        error: TransportError::Closed,
                    });
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    return Err(WaitFailure {
                        output,
                        error: TransportError::Io(e.to_string()),
                    });
                }
                Err(_) => {
                    return Err(WaitFailure {
                        error: TransportError::Timeout {
                            after_ms: millis(started.elapsed()),
                            received: self.raw.len(),
                        },
                        output,
                    });
                }
            };

            if let Err(error) = self.absorb(&chunk[..read]).await {
                return Err(WaitFailure { output, error });
            }
        }
    }

    /// Shuts down the write half
    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("telnet", &self.telnet)
            .field("buffered", &self.raw.len())
            .finish_non_exhaustive()
    }
}
