//! Operations and raw results
//!
//! An [`Operation`] is one request or command issued against a session: what
//! to send ([`Target`]), how long an attempt may take, how many times it may be
//! retried, and what a successful response looks like ([`SuccessPredicate`]).
//! Transports answer an operation with a [`RawResult`].

use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::variables::Variables;

/// Default per-attempt timeout in milliseconds
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 15_000;

/// Default ceiling for menu keystroke resends on interactive shells
pub const DEFAULT_MENU_ATTEMPTS: u32 = 10;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// How the session credential is presented on an HTTP request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpAuthMode {
    /// Use whatever artifact the session holds (token, cookie or header)
    #[default]
    Session,
    /// Per-call basic authentication with the configured credentials
    Basic,
    /// Send nothing
    None,
}

/// Request/response target
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRequest {
    /// Request method
    pub method: HttpMethod,
    /// Path relative to the transport base URL, or an absolute URL
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Option<String>,
    /// Credential presentation
    pub auth: HttpAuthMode,
}

impl HttpRequest {
    /// Creates a GET request for `path`
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Creates a POST request for `path` with a body
    #[must_use]
    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body.into()),
            ..Self::default()
        }
    }

    /// Adds a request header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query parameter
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Sets the credential presentation
    #[must_use]
    pub const fn with_auth(mut self, auth: HttpAuthMode) -> Self {
        self.auth = auth;
        self
    }
}

/// Input lines for an interactive shell channel
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellInput {
    /// Lines written to the channel, each followed by the line ending
    pub lines: Vec<String>,
    /// Regex that marks the end of the response
    pub terminator: String,
    /// When set, the last line is a menu keystroke that is resent up to this
    /// many times until the terminator appears
    pub menu_attempts: Option<u32>,
    /// Regex separating output blocks (see [`RawResult::blocks`])
    pub block_boundary: Option<String>,
}

impl ShellInput {
    /// Creates a single-command input waiting for `terminator`
    #[must_use]
    pub fn command(line: impl Into<String>, terminator: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            terminator: terminator.into(),
            ..Self::default()
        }
    }

    /// Treats the input as digit-driven menu navigation
    #[must_use]
    pub const fn with_menu_attempts(mut self, attempts: u32) -> Self {
        self.menu_attempts = Some(attempts);
        self
    }
}

/// Structured remote command
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCommand {
    /// Command line executed on the remote host
    pub command: String,
}

/// Keystrokes for a line-oriented terminal session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalInput {
    /// Navigation keystrokes sent after the credentials
    pub keystrokes: Vec<String>,
    /// Regex the response must match before it is complete
    pub expect_prompt: String,
    /// Prefix the stream with `${username}` and `${password}` lines
    pub send_credentials: bool,
}

/// What an operation sends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// HTTP(S) request
    Http(HttpRequest),
    /// Interactive shell exchange
    Shell(ShellInput),
    /// Structured remote command
    Command(RemoteCommand),
    /// Line-oriented terminal exchange
    Terminal(TerminalInput),
}

impl Target {
    /// Substitutes `${name}` references in every text field
    #[must_use]
    pub fn render(&self, vars: &Variables) -> Self {
        match self {
            Self::Http(req) => Self::Http(HttpRequest {
                method: req.method,
                path: vars.substitute(&req.path),
                query: render_pairs(&req.query, vars),
                headers: render_pairs(&req.headers, vars),
                body: req.body.as_deref().map(|b| vars.substitute(b)),
                auth: req.auth,
            }),
            Self::Shell(input) => Self::Shell(ShellInput {
                lines: input.lines.iter().map(|l| vars.substitute(l)).collect(),
                terminator: input.terminator.clone(),
                menu_attempts: input.menu_attempts,
                block_boundary: input.block_boundary.clone(),
            }),
            Self::Command(cmd) => Self::Command(RemoteCommand {
                command: vars.substitute(&cmd.command),
            }),
            Self::Terminal(input) => Self::Terminal(TerminalInput {
                keystrokes: input.keystrokes.iter().map(|k| vars.substitute(k)).collect(),
                expect_prompt: input.expect_prompt.clone(),
                send_credentials: input.send_credentials,
            }),
        }
    }
}

fn render_pairs(pairs: &[(String, String)], vars: &Variables) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.clone(), vars.substitute(v)))
        .collect()
}

/// Condition a raw result must satisfy to count as a success
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SuccessPredicate {
    /// 2xx for HTTP, exit 0 for commands, anything for shells
    #[default]
    Default,
    /// Any completed response
    Any,
    /// Status code must be in the set
    Status(Vec<u16>),
    /// Exit code must be in the set
    ExitCode(Vec<i32>),
    /// Output must match the regex
    OutputMatches(String),
}

impl SuccessPredicate {
    /// Evaluates the predicate against a result
    ///
    /// An invalid `OutputMatches` pattern never matches.
    #[must_use]
    pub fn evaluate(&self, result: &RawResult) -> bool {
        match self {
            Self::Default => {
                result.status.is_none_or(|s| (200..300).contains(&s))
                    && result.exit_code.is_none_or(|c| c == 0)
            }
            Self::Any => true,
            Self::Status(codes) => result.status.is_some_and(|s| codes.contains(&s)),
            Self::ExitCode(codes) => result.exit_code.is_some_and(|c| codes.contains(&c)),
            Self::OutputMatches(pattern) => {
                Regex::new(pattern).is_ok_and(|re| re.is_match(&result.body))
            }
        }
    }
}

/// Delay policy between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "delay_ms", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately
    #[default]
    None,
    /// Wait a fixed number of milliseconds
    Fixed(u64),
}

impl Backoff {
    /// Delay before the next attempt
    #[must_use]
    pub const fn delay(&self) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(ms) => Duration::from_millis(*ms),
        }
    }
}

/// One request or command issued against a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Name used in logs and error messages
    #[serde(default)]
    pub name: String,
    /// What to send
    pub target: Target,
    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retry budget: at most `retries + 1` attempts
    #[serde(default)]
    pub retries: u32,
    /// Delay between attempts
    #[serde(default)]
    pub backoff: Backoff,
    /// Success condition
    #[serde(default)]
    pub predicate: SuccessPredicate,
    /// Statuses meaning the session token expired (triggers one re-login)
    #[serde(default)]
    pub expired_token_status: Vec<u16>,
    /// Credential attached by the session, never serialized
    #[serde(skip)]
    pub credential: Option<AttachedCredential>,
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_MS
}

impl Operation {
    /// Creates an operation with default timeout, no retries and the
    /// default predicate
    #[must_use]
    pub fn new(name: impl Into<String>, target: Target) -> Self {
        Self {
            name: name.into(),
            target,
            timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            retries: 0,
            backoff: Backoff::None,
            predicate: SuccessPredicate::Default,
            expired_token_status: Vec::new(),
            credential: None,
        }
    }

    /// Creates an HTTP operation
    #[must_use]
    pub fn http(name: impl Into<String>, request: HttpRequest) -> Self {
        Self::new(name, Target::Http(request))
    }

    /// Creates an interactive shell operation
    #[must_use]
    pub fn shell(name: impl Into<String>, input: ShellInput) -> Self {
        Self::new(name, Target::Shell(input))
    }

    /// Creates a structured remote command operation
    #[must_use]
    pub fn command(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            name,
            Target::Command(RemoteCommand {
                command: command.into(),
            }),
        )
    }

    /// Creates a line-oriented terminal operation
    #[must_use]
    pub fn terminal(name: impl Into<String>, input: TerminalInput) -> Self {
        Self::new(name, Target::Terminal(input))
    }

    /// Sets the per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the retry budget
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the backoff policy
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the success predicate
    #[must_use]
    pub fn with_predicate(mut self, predicate: SuccessPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Declares statuses that signal an expired session token
    #[must_use]
    pub fn with_expired_token_status(mut self, statuses: Vec<u16>) -> Self {
        self.expired_token_status = statuses;
        self
    }

    /// Per-attempt timeout as a `Duration`
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total attempts permitted by the retry budget
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Returns a copy with `${name}` references substituted
    #[must_use]
    pub fn render(&self, vars: &Variables) -> Self {
        Self {
            target: self.target.render(vars),
            ..self.clone()
        }
    }

    /// Whether the result signals an expired session token
    #[must_use]
    pub fn signals_expired_token(&self, result: &RawResult) -> bool {
        result
            .status
            .is_some_and(|s| self.expired_token_status.contains(&s))
    }
}

/// Credential material a session attaches to an outgoing operation
#[derive(Debug, Clone)]
pub enum AttachedCredential {
    /// Basic authentication
    Basic {
        /// Account name
        username: String,
        /// Account secret
        password: SecretString,
    },
    /// `Authorization: Bearer` token
    Bearer(SecretString),
    /// Named cookie
    Cookie {
        /// Cookie name
        name: String,
        /// Cookie value
        value: SecretString,
    },
    /// Arbitrary header carrying a token
    Header {
        /// Header name
        name: String,
        /// Header value
        value: SecretString,
    },
    /// Plain credentials for transports that log in in-band
    Login {
        /// Account name
        username: String,
        /// Account secret
        password: SecretString,
    },
}

// Credentials are excluded from equality; two operations are equal if they
// address the same target the same way.
impl PartialEq for AttachedCredential {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for AttachedCredential {}

/// Unprocessed transport output plus metadata
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResult {
    /// Response body or accumulated output (stdout for commands)
    pub body: String,
    /// Protocol status code
    pub status: Option<u16>,
    /// Remote exit status
    pub exit_code: Option<i32>,
    /// Standard error for structured commands
    pub stderr: Option<String>,
    /// Text that matched the terminator or expected prompt
    pub matched_terminator: Option<String>,
    /// Response headers, names lower-cased
    pub headers: Vec<(String, String)>,
    /// Output blocks split on the shell block boundary
    pub blocks: Vec<String>,
    /// Wall time of the attempt
    pub elapsed: Duration,
}

impl RawResult {
    /// Creates a result carrying only a body
    #[must_use]
    pub fn from_body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Sets the status code
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the exit code
    #[must_use]
    pub const fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Adds a response header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    /// First header value with the given (case-insensitive) name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All header values with the given (case-insensitive) name
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the status is a redirect carrying a `Location`
    #[must_use]
    pub fn redirect_location(&self) -> Option<&str> {
        match self.status {
            Some(300..=399) => self.header("location"),
            _ => None,
        }
    }
}
