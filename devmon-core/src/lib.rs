//! `devmon` Core Library
//!
//! Session and command-execution engine for device monitoring probes: open a
//! channel to an appliance, authenticate, run operations under a retry and
//! timeout budget, normalize what comes back and report it.
//!
//! # Crate Structure
//!
//! - [`transport`] - HTTP, interactive shell, remote command and terminal channels
//! - [`session`] - Login strategies and the per-cycle session
//! - [`executor`] - Single, chained and fan-out operation execution
//! - [`normalize`] - JSON, markup, key/value and column parsers
//! - [`report`] - Readings, tables and the monitoring sink
//! - [`classify`] - Failure classification
//! - [`poller`] - Validation and polling cycles
//! - [`config`] - Device profiles and parameters

// Enable missing_docs warning for public API documentation
#![warn(missing_docs)]

pub mod classify;
pub mod config;
pub mod executor;
pub mod normalize;
pub mod operation;
pub mod poller;
pub mod report;
pub mod session;
pub mod tracing;
pub mod transport;
pub mod variables;

// =============================================================================
// Convenience re-exports
//
// The CLI and the integration tests import the common types from the crate
// root; less common types stay behind their module paths.
// =============================================================================

pub use classify::{ClassifiedError, ErrorClassification, FailureSignal, classify};
pub use config::{
    ConfigError, ConfigManager, ConfigParameters, ConfigResult, DeviceConfig, DeviceParameters,
    ParameterProvider, ProfileConfig, StaticParameters,
};
pub use executor::{ChainStep, Executor};
pub use normalize::{
    Encoding, FieldKind, FieldSpec, FieldValue, NormalizeError, Normalized, NormalizedRecord,
    Normalizer,
};
pub use operation::{
    AttachedCredential, Backoff, HttpAuthMode, HttpMethod, HttpRequest, Operation, RawResult,
    RemoteCommand, ShellInput, SuccessPredicate, Target, TerminalInput,
};
pub use poller::{Connector, DeviceProfile, Poller, PreparedTransport, Validation};
pub use report::{
    CollisionPolicy, MemorySink, MonitoringRecord, MonitoringSink, PollReport, Reading,
    ReadingKind, ReportError, Reporter, Table, sanitize_id,
};
pub use session::{AuthStrategy, Credentials, Session, SessionManager};
pub use tracing::{
    TracingConfig, TracingError, TracingLevel, TracingOutput, TracingResult, init_tracing,
};
pub use transport::{Transport, TransportError, TransportKind, TransportResult};
pub use variables::Variables;
