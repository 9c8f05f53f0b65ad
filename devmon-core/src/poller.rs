//! Polling cycles
//!
//! A [`Poller`] runs one cycle per call: connect, log in, run the device
//! profile's operations and build a report. Session state lives only for
//! the duration of the cycle. Panics anywhere inside a cycle are caught and
//! reported as a generic error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::Instrument;

use crate::classify::ClassifiedError;
use crate::executor::{DEFAULT_CONCURRENCY, Executor, guarded};
use crate::operation::Operation;
use crate::report::{MonitoringSink, PollReport, Reporter};
use crate::session::{AuthStrategy, Credentials, SessionManager};
use crate::tracing::span_names;
use crate::transport::{Transport, TransportKind, TransportResult};

/// Opens the transport for a cycle
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a fresh transport
    async fn connect(&self) -> TransportResult<Arc<dyn Transport>>;
}

/// A transport opened ahead of time, handed out as is
pub struct PreparedTransport(Arc<dyn Transport>);

impl PreparedTransport {
    /// Wraps an open transport
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self(transport)
    }
}

#[async_trait]
impl Connector for PreparedTransport {
    async fn connect(&self) -> TransportResult<Arc<dyn Transport>> {
        Ok(Arc::clone(&self.0))
    }
}

/// What to run against a device
#[async_trait]
pub trait DeviceProfile: Send + Sync {
    /// How to authenticate
    fn auth(&self) -> AuthStrategy;

    /// Cheap operation proving the device answers and the login works
    fn probe(&self) -> Operation;

    /// Runs the collection plan and adds the results to `reporter`
    async fn collect(
        &self,
        executor: &Executor,
        reporter: &mut Reporter,
    ) -> Result<(), ClassifiedError>;
}

/// Outcome of a successful validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    /// Device name
    pub device: String,
    /// Transport family used
    pub transport: TransportKind,
    /// Authentication strategy used
    pub strategy: &'static str,
    /// Prompt seen after an interactive login
    pub prompt: Option<String>,
    /// Wall time of the whole check
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Runs validation and polling cycles for one device
pub struct Poller {
    device: String,
    connector: Arc<dyn Connector>,
    profile: Arc<dyn DeviceProfile>,
    credentials: Credentials,
    concurrency: usize,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("device", &self.device)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Creates a poller
    #[must_use]
    pub fn new(
        device: impl Into<String>,
        connector: Arc<dyn Connector>,
        profile: Arc<dyn DeviceProfile>,
        credentials: Credentials,
    ) -> Self {
        Self {
            device: device.into(),
            connector,
            profile,
            credentials,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Sets the fan-out limit
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Device name
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Checks that the device is reachable, the credentials are accepted and
    /// the probe operation succeeds
    pub async fn validate(&self) -> Result<Validation, ClassifiedError> {
        let span = crate::trace_operation!(span_names::POLL_VALIDATE, device = %self.device);
        let started = Instant::now();
        let outcome = contained("validate", self.validate_cycle(started))
            .instrument(span.clone())
            .await;
        span.in_scope(|| log_outcome("Validation", &outcome, started));
        outcome
    }

    /// Runs one full polling cycle and returns its report
    pub async fn poll(&self) -> Result<PollReport, ClassifiedError> {
        let span = crate::trace_operation!(span_names::POLL_CYCLE, device = %self.device);
        let started = Instant::now();
        let outcome = contained("poll", self.poll_cycle())
            .instrument(span.clone())
            .await;
        span.in_scope(|| log_outcome("Poll", &outcome, started));
        outcome
    }

    /// Runs one cycle and delivers the report to `sink`.
    ///
    /// Nothing reaches the sink when the cycle fails. Returns the number of
    /// records delivered.
    pub async fn poll_into(&self, sink: &mut dyn MonitoringSink) -> Result<usize, ClassifiedError> {
        let report = self.poll().await?;
        let count = report.record_count();
        report.deliver(sink).map_err(|e| e.classified())?;
        Ok(count)
    }

    async fn validate_cycle(&self, started: Instant) -> Result<Validation, ClassifiedError> {
        let transport = self.open().await?;
        let outcome = async {
            let executor = self.executor(Arc::clone(&transport));
            let session = executor.sessions().login(transport.as_ref()).await?;
            executor.run_one(&self.profile.probe()).await?;
            Ok(Validation {
                device: self.device.clone(),
                transport: transport.kind(),
                strategy: executor.sessions().strategy().name(),
                prompt: session.prompt.clone(),
                elapsed: started.elapsed(),
            })
        }
        .await;
        transport.close().await;
        outcome
    }

    async fn poll_cycle(&self) -> Result<PollReport, ClassifiedError> {
        let transport = self.open().await?;
        let outcome = async {
            let executor = self.executor(Arc::clone(&transport));
            executor.sessions().login(transport.as_ref()).await?;
            let mut reporter = Reporter::new(&self.device);
            tracing::debug!(run_id = %reporter.run_id(), "Collecting");
            self.profile.collect(&executor, &mut reporter).await?;
            Ok(reporter.finish())
        }
        .await;
        transport.close().await;
        outcome
    }

    async fn open(&self) -> Result<Arc<dyn Transport>, ClassifiedError> {
        let span = tracing::debug_span!(span_names::TRANSPORT_OPEN, device = %self.device);
        self.connector
            .connect()
            .instrument(span)
            .await
            .map_err(|e| e.classified("connect"))
    }

    fn executor(&self, transport: Arc<dyn Transport>) -> Executor {
        let sessions = Arc::new(SessionManager::new(
            self.profile.auth(),
            self.credentials.clone(),
        ));
        Executor::new(transport, sessions).with_concurrency(self.concurrency)
    }
}

async fn contained<T>(
    what: &str,
    cycle: impl std::future::Future<Output = Result<T, ClassifiedError>>,
) -> Result<T, ClassifiedError> {
    guarded(cycle)
        .await
        .unwrap_or_else(|panic| Err(ClassifiedError::generic(format!("{what} panicked: {panic}"))))
}

fn log_outcome<T>(what: &str, outcome: &Result<T, ClassifiedError>, started: Instant) {
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match outcome {
        Ok(_) => tracing::info!(duration_ms, "{what} succeeded"),
        Err(e) => tracing::warn!(
            duration_ms,
            classification = %e.classification,
            error = %e.message,
            "{what} failed"
        ),
    }
}
