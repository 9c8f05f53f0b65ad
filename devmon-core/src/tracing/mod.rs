//! Structured logging setup and shared span names
//!
//! Every layer of a polling cycle opens a span named from [`span_names`] so a
//! single `RUST_LOG` directive can follow one device through transport open,
//! login, operation attempts and parsing. Secrets never appear as fields.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Third-party targets kept at warn unless a custom filter says otherwise
const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "native_tls"];

/// Failures while installing the global subscriber
#[derive(Debug, Error)]
pub enum TracingError {
    /// The filter directive could not be parsed
    #[error("invalid log filter '{directive}': {reason}")]
    BadFilter {
        /// Directive as given
        directive: String,
        /// Parser message
        reason: String,
    },

    /// A subscriber is already installed for this process
    #[error("a log subscriber is already installed")]
    AlreadyInstalled,

    /// The log file could not be opened
    #[error("cannot open log file {}: {source}", path.display())]
    LogFile {
        /// Requested path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Unrecognised level name
    #[error("unknown log level '{0}'")]
    UnknownLevel(String),
}

/// Result type for logging setup
pub type TracingResult<T> = Result<T, TracingError>;

/// Verbosity of devmon's own targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TracingLevel {
    /// Errors only
    Error,
    /// Errors and warnings
    #[default]
    Warn,
    /// Cycle milestones
    Info,
    /// Per-operation detail
    Debug,
    /// Per-attempt and per-chunk detail
    Trace,
}

impl TracingLevel {
    /// The matching `tracing` level
    #[must_use]
    pub const fn to_tracing_level(self) -> Level {
        match self {
            Self::Error => Level::ERROR,
            Self::Warn => Level::WARN,
            Self::Info => Level::INFO,
            Self::Debug => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Maps a `-v` count to a level: none is warn, then info, debug, trace
    #[must_use]
    pub const fn from_verbosity(count: u8) -> Self {
        match count {
            0 => Self::Warn,
            1 => Self::Info,
            2 => Self::Debug,
            _ => Self::Trace,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::str::FromStr for TracingLevel {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => return Err(TracingError::UnknownLevel(s.to_string())),
        };
        Ok(level)
    }
}

impl std::fmt::Display for TracingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where log lines go. Report output owns stdout, so stderr is the default.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TracingOutput {
    /// Standard output
    Stdout,
    /// Standard error
    #[default]
    Stderr,
    /// Truncated on start, written without ANSI colours
    File {
        /// Log file location
        path: PathBuf,
    },
}

impl TracingOutput {
    fn writer(&self) -> TracingResult<(BoxMakeWriter, bool)> {
        Ok(match self {
            Self::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
            Self::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
            Self::File { path } => {
                let file = std::fs::File::create(path).map_err(|source| TracingError::LogFile {
                    path: path.clone(),
                    source,
                })?;
                (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
            }
        })
    }
}

/// Logging setup for one process
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Level for devmon targets
    pub level: TracingLevel,
    /// Destination
    pub output: TracingOutput,
    /// Tag lines with the worker thread, handy while a fan-out is running
    pub thread_ids: bool,
    /// Full `EnvFilter` directive; replaces both `level` and `RUST_LOG`
    pub filter: Option<String>,
}

impl TracingConfig {
    /// Warn level to stderr
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Setup used by the `devmon` binary: `-q` wins over any `-v` count
    #[must_use]
    pub fn for_cli(verbose: u8, quiet: bool) -> Self {
        let level = if quiet {
            TracingLevel::Error
        } else {
            TracingLevel::from_verbosity(verbose)
        };
        Self::new()
            .with_level(level)
            .with_thread_ids(level >= TracingLevel::Trace)
    }

    /// Sets the level
    #[must_use]
    pub const fn with_level(mut self, level: TracingLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the destination
    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Toggles thread ids
    #[must_use]
    pub const fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.thread_ids = enabled;
        self
    }

    /// Replaces level-based filtering with a raw directive
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Directive used when neither a custom filter nor `RUST_LOG` is set
    #[must_use]
    pub fn default_directive(&self) -> String {
        let mut directive = format!("devmon_core={0},devmon={0}", self.level);
        for target in NOISY_TARGETS {
            directive.push(',');
            directive.push_str(target);
            directive.push_str("=warn");
        }
        directive
    }

    fn env_filter(&self) -> TracingResult<EnvFilter> {
        let bad = |directive: &str, e: &dyn std::fmt::Display| TracingError::BadFilter {
            directive: directive.to_string(),
            reason: e.to_string(),
        };
        if let Some(custom) = &self.filter {
            return EnvFilter::try_new(custom).map_err(|e| bad(custom, &e));
        }
        if let Ok(from_env) = EnvFilter::try_from_default_env() {
            return Ok(from_env);
        }
        let directive = self.default_directive();
        EnvFilter::try_new(&directive).map_err(|e| bad(&directive, &e))
    }
}

/// Installs the global subscriber. Only the first call in a process succeeds.
///
/// # Errors
///
/// [`TracingError::AlreadyInstalled`] on repeat calls, [`TracingError::BadFilter`]
/// for an unparsable custom filter and [`TracingError::LogFile`] when file
/// output cannot be opened.
pub fn init_tracing(config: &TracingConfig) -> TracingResult<()> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Err(TracingError::AlreadyInstalled);
    }

    let filter = config.env_filter()?;
    let (writer, ansi) = config.output.writer()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(config.thread_ids)
                .with_ansi(ansi)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|_| TracingError::AlreadyInstalled)?;

    tracing::debug!(level = %config.level, "Logging ready");
    Ok(())
}

/// Opens an info-level span with the given name and fields
///
/// ```ignore
/// let span = devmon_core::trace_operation!(span_names::POLL_CYCLE, device = %name);
/// ```
#[macro_export]
macro_rules! trace_operation {
    ($name:expr) => {
        tracing::info_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}

/// Span names shared by every layer
pub mod span_names {
    /// Channel setup
    pub const TRANSPORT_OPEN: &str = "transport.open";
    /// First login and every renewal
    pub const SESSION_LOGIN: &str = "session.login";
    /// One operation across all of its attempts
    pub const EXECUTOR_RUN: &str = "executor.run";
    /// A single attempt
    pub const EXECUTOR_ATTEMPT: &str = "executor.attempt";
    /// Bounded fan-out
    pub const EXECUTOR_BATCH: &str = "executor.batch";
    /// Payload parsing
    pub const NORMALIZE_PARSE: &str = "normalize.parse";
    /// Validation cycle
    pub const POLL_VALIDATE: &str = "poll.validate";
    /// Polling cycle
    pub const POLL_CYCLE: &str = "poll.cycle";
    /// Profile loading
    pub const CONFIG_LOAD: &str = "config.load";
}
