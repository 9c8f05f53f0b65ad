//! Operation executor
//!
//! Runs operations against the current session: single operations with
//! retries, dependent chains and bounded fan-out batches. Every attempt is
//! bounded by a deadline; exhausting the retry budget yields exactly one
//! [`ClassifiedError`].

mod retry;

pub use retry::{AttemptFailure, RetryState};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tracing::Instrument;

use crate::classify::ClassifiedError;
use crate::operation::{Operation, RawResult};
use crate::session::{Session, SessionManager};
use crate::tracing::span_names;
use crate::transport::Transport;

/// Default number of operations in flight during fan-out
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Margin added to an operation's timeout for the outer deadline.
///
/// Transports enforce the operation timeout themselves and report the more
/// precise failure (partial data, terminator exhausted); the outer deadline
/// only catches transports that hang.
pub const DEFAULT_DEADLINE_GRACE: Duration = Duration::from_millis(250);

/// Builds the next operation of a chain from the previous result
pub type ChainStep =
    Box<dyn FnOnce(&RawResult) -> Result<Operation, ClassifiedError> + Send + 'static>;

/// Runs operations for one polling cycle
pub struct Executor {
    transport: Arc<dyn Transport>,
    sessions: Arc<SessionManager>,
    concurrency: usize,
    grace: Duration,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("transport", &self.transport.kind())
            .field("concurrency", &self.concurrency)
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor over an open transport and its session manager
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, sessions: Arc<SessionManager>) -> Self {
        Self {
            transport,
            sessions,
            concurrency: DEFAULT_CONCURRENCY,
            grace: DEFAULT_DEADLINE_GRACE,
        }
    }

    /// Sets the fan-out limit (at least 1)
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the outer deadline margin
    #[must_use]
    pub const fn with_deadline_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// The transport operations are sent on
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The session manager
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Runs one operation through its retry budget.
    ///
    /// An expired-token response triggers one re-login and a resend that
    /// does not consume an attempt.
    ///
    /// # Errors
    ///
    /// Returns the classification of the last failure once the budget is
    /// exhausted, or of a failed re-login.
    pub async fn run_one(&self, operation: &Operation) -> Result<RawResult, ClassifiedError> {
        let span = tracing::debug_span!(
            span_names::EXECUTOR_RUN,
            operation = %operation.name,
            budget = operation.max_attempts(),
        );
        self.attempt_loop(operation).instrument(span).await
    }

    async fn attempt_loop(&self, operation: &Operation) -> Result<RawResult, ClassifiedError> {
        let mut session = self.session().await?;
        let mut authorized = session.authorize(operation);
        let mut relogged = false;
        let mut state = RetryState::for_operation(operation);

        loop {
            let attempt = state.attempt_number();
            let outcome = self
                .attempt(&authorized)
                .instrument(tracing::debug_span!(span_names::EXECUTOR_ATTEMPT, attempt))
                .await;

            let failure = match outcome {
                Ok(result) if operation.signals_expired_token(&result) && !relogged => {
                    relogged = true;
                    session = self
                        .sessions
                        .relogin(self.transport.as_ref(), session.generation)
                        .await?;
                    authorized = session.authorize(operation);
                    continue;
                }
                Ok(result) if operation.predicate.evaluate(&result) => {
                    state.record_success();
                    tracing::debug!(attempt, elapsed = ?result.elapsed, "Operation succeeded");
                    return Ok(result);
                }
                Ok(result) => AttemptFailure::Rejected(result),
                Err(failure) => failure,
            };

            tracing::debug!(attempt, total = state.total_attempts(), ?failure, "Attempt failed");
            if !state.record_failure(failure) {
                let error = state.into_classified(&operation.name);
                tracing::warn!(
                    classification = %error.classification,
                    error = %error.message,
                    "Operation failed"
                );
                return Err(error);
            }

            let delay = state.next_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn attempt(&self, operation: &Operation) -> Result<RawResult, AttemptFailure> {
        let deadline = operation.timeout() + self.grace;
        match tokio::time::timeout(deadline, self.transport.send(operation)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(AttemptFailure::Transport(e)),
            Err(_) => Err(AttemptFailure::Elapsed {
                after_ms: operation.timeout_ms,
            }),
        }
    }

    async fn session(&self) -> Result<Arc<Session>, ClassifiedError> {
        self.sessions.current().await.ok_or_else(|| {
            ClassifiedError::generic("operation attempted without an authenticated session")
        })
    }

    /// Runs a dependent chain: each step builds the next operation from the
    /// previous result. Returns every result in order.
    ///
    /// # Errors
    ///
    /// Aborts on the first failure, which is returned unchanged.
    pub async fn run_chain(
        &self,
        first: &Operation,
        steps: Vec<ChainStep>,
    ) -> Result<Vec<RawResult>, ClassifiedError> {
        let mut results = Vec::with_capacity(steps.len() + 1);
        let mut previous = self.run_one(first).await?;

        for step in steps {
            let next = step(&previous)?;
            let result = self.run_one(&next).await?;
            results.push(previous);
            previous = result;
        }

        results.push(previous);
        Ok(results)
    }

    /// Runs independent operations with bounded concurrency.
    ///
    /// Every operation runs to completion regardless of its siblings; the
    /// outcomes come back in input order, one per operation.
    pub async fn run_batch(&self, operations: Vec<Operation>) -> Vec<Result<RawResult, ClassifiedError>> {
        let count = operations.len();
        let span = tracing::debug_span!(
            span_names::EXECUTOR_BATCH,
            operations = count,
            concurrency = self.concurrency,
        );

        async {
            let outcomes: Vec<_> = futures::stream::iter(operations)
                .map(|operation| async move {
                    guarded(self.run_one(&operation))
                        .await
                        .unwrap_or_else(|panic| {
                            Err(ClassifiedError::generic(format!(
                                "{}: panicked: {panic}",
                                operation.name
                            )))
                        })
                })
                .buffered(self.concurrency)
                .collect()
                .await;

            let failed = outcomes.iter().filter(|o| o.is_err()).count();
            tracing::debug!(count, failed, "Batch finished");
            outcomes
        }
        .instrument(span)
        .await
    }
}

/// Runs a future, turning a panic into its message
pub(crate) async fn guarded<F, T>(future: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic_msg = %message, "Task panicked");
            message
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorClassification;
    use crate::operation::{Backoff, HttpRequest, SuccessPredicate, Target};
    use crate::session::{ArtifactExtractor, AuthStrategy, Credentials, Presentation};
    use crate::transport::fixtures::ScriptedTransport;
    use crate::transport::{TransportError, TransportKind};
    use secrecy::SecretString;

    fn credentials() -> Credentials {
        Credentials::new("admin", SecretString::from("pw"))
    }

    async fn executor(transport: ScriptedTransport, strategy: AuthStrategy) -> (Executor, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let sessions = Arc::new(SessionManager::new(strategy, credentials()));
        sessions.login(transport.as_ref()).await.unwrap();
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        (Executor::new(dyn_transport, sessions), transport)
    }

    fn path_of(op: &Operation) -> String {
        match &op.target {
            Target::Http(req) => req.path.clone(),
            _ => String::new(),
        }
    }

    #[tokio::test]
    async fn test_failing_predicate_uses_whole_budget() {
        let scripted = ScriptedTransport::sequence(
            TransportKind::Http,
            vec![Ok(RawResult::from_body("busy").with_status(500))],
        );
        let (executor, transport) = executor(scripted, AuthStrategy::Stateless).await;

        let op = Operation::http("status", HttpRequest::get("/status")).with_retries(3);
        let err = executor.run_one(&op).await.unwrap_err();

        assert_eq!(transport.calls(), 4);
        assert_eq!(err.classification, ErrorClassification::GenericError);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let scripted = ScriptedTransport::sequence(
            TransportKind::Http,
            vec![
                Err(TransportError::Timeout {
                    after_ms: 10,
                    received: 0,
                }),
                Ok(RawResult::from_body("").with_status(503)),
                Ok(RawResult::from_body("ok").with_status(200)),
            ],
        );
        let (executor, transport) = executor(scripted, AuthStrategy::Stateless).await;

        let op = Operation::http("status", HttpRequest::get("/status"))
            .with_retries(2)
            .with_backoff(Backoff::Fixed(5));
        let result = executor.run_one(&op).await.unwrap();
        assert_eq!(result.body, "ok");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_timeouts_are_unavailable() {
        let scripted = ScriptedTransport::sequence(
            TransportKind::Http,
            vec![Err(TransportError::Timeout {
                after_ms: 10,
                received: 0,
            })],
        );
        let (executor, _) = executor(scripted, AuthStrategy::Stateless).await;
        let op = Operation::http("status", HttpRequest::get("/status")).with_retries(1);
        let err = executor.run_one(&op).await.unwrap_err();
        assert_eq!(err.classification, ErrorClassification::ResourceUnavailable);
    }

    #[tokio::test]
    async fn test_expired_token_relogs_once() {
        let scripted = ScriptedTransport::new(TransportKind::Http, |op, _| {
            if path_of(op) == "/login" {
                return Ok(RawResult::from_body(r#"{"token":"fresh"}"#).with_status(200));
            }
            Ok(RawResult::from_body("expired").with_status(419))
        });
        let strategy = AuthStrategy::SingleCall {
            request: Operation::http("login", HttpRequest::post("/login", "")),
            extractor: ArtifactExtractor::JsonPointer {
                pointer: "/token".into(),
            },
            present: Presentation::Bearer,
        };
        let (executor, transport) = executor(scripted, strategy).await;

        let op = Operation::http("data", HttpRequest::get("/data"))
            .with_expired_token_status(vec![419])
            .with_retries(1);
        let err = executor.run_one(&op).await.unwrap_err();

        let paths: Vec<String> = transport.sent().iter().map(path_of).collect();
        // login, data, re-login, data, data (retry)
        assert_eq!(paths, vec!["/login", "/data", "/login", "/data", "/data"]);
        assert_eq!(executor.sessions().login_count(), 2);
        assert_eq!(err.classification, ErrorClassification::GenericError);
    }

    #[tokio::test]
    async fn test_unauthenticated_session_never_sends() {
        let transport = Arc::new(ScriptedTransport::sequence(TransportKind::Http, vec![]));
        let sessions = Arc::new(SessionManager::new(AuthStrategy::Stateless, credentials()));
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let executor = Executor::new(dyn_transport, sessions);

        let err = executor
            .run_one(&Operation::http("x", HttpRequest::get("/")))
            .await
            .unwrap_err();
        assert_eq!(err.classification, ErrorClassification::GenericError);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_chain_feeds_previous_result() {
        let scripted = ScriptedTransport::new(TransportKind::Http, |op, _| {
            Ok(match path_of(op).as_str() {
                "/jobs" => RawResult::from_body("job-42").with_status(200),
                "/jobs/job-42" => RawResult::from_body("done").with_status(200),
                _ => RawResult::from_body("").with_status(404),
            })
        });
        let (executor, _) = executor(scripted, AuthStrategy::Stateless).await;

        let first = Operation::http("create", HttpRequest::get("/jobs"));
        let steps: Vec<ChainStep> = vec![Box::new(|prev: &RawResult| {
            Ok(Operation::http(
                "poll",
                HttpRequest::get(format!("/jobs/{}", prev.body)),
            ))
        })];
        let results = executor.run_chain(&first, steps).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].body, "done");
    }

    #[tokio::test]
    async fn test_chain_aborts_on_root_failure() {
        let scripted = ScriptedTransport::sequence(
            TransportKind::Http,
            vec![Ok(RawResult::from_body("").with_status(404))],
        );
        let (executor, transport) = executor(scripted, AuthStrategy::Stateless).await;

        let steps: Vec<ChainStep> = vec![Box::new(|_: &RawResult| {
            Ok(Operation::http("never", HttpRequest::get("/never")))
        })];
        let err = executor
            .run_chain(&Operation::http("root", HttpRequest::get("/root")), steps)
            .await
            .unwrap_err();
        assert_eq!(err.classification, ErrorClassification::ResourceUnavailable);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_returns_one_outcome_per_operation_in_order() {
        let scripted = ScriptedTransport::new(TransportKind::Http, |op, _| {
            let path = path_of(op);
            if path.ends_with("/3") {
                Ok(RawResult::from_body("").with_status(500))
            } else {
                Ok(RawResult::from_body(path).with_status(200))
            }
        });
        let (executor, _) = executor(scripted, AuthStrategy::Stateless).await;
        let executor = executor.with_concurrency(2);

        let ops: Vec<Operation> = (0..6)
            .map(|i| Operation::http(format!("item {i}"), HttpRequest::get(format!("/items/{i}"))))
            .collect();
        let outcomes = executor.run_batch(ops).await;

        assert_eq!(outcomes.len(), 6);
        for (i, outcome) in outcomes.iter().enumerate() {
            if i == 3 {
                assert!(outcome.is_err());
            } else {
                assert_eq!(outcome.as_ref().unwrap().body, format!("/items/{i}"));
            }
        }
    }

    #[tokio::test]
    async fn test_batch_contains_panics() {
        let scripted = ScriptedTransport::new(TransportKind::Http, |op, _| {
            assert!(path_of(op) != "/boom", "device handler exploded");
            Ok(RawResult::from_body("ok").with_status(200))
        });
        let (executor, _) = executor(scripted, AuthStrategy::Stateless).await;

        let ops = vec![
            Operation::http("boom", HttpRequest::get("/boom")),
            Operation::http("fine", HttpRequest::get("/fine")),
        ];
        let outcomes = executor.run_batch(ops).await;
        let err = outcomes[0].as_ref().unwrap_err();
        assert_eq!(err.classification, ErrorClassification::GenericError);
        assert!(err.message.contains("exploded"));
        assert!(outcomes[1].is_ok());
    }

    #[tokio::test]
    async fn test_output_predicate() {
        let scripted = ScriptedTransport::sequence(
            TransportKind::Http,
            vec![Ok(RawResult::from_body("state: DEGRADED").with_status(200))],
        );
        let (executor, _) = executor(scripted, AuthStrategy::Stateless).await;
        let op = Operation::http("state", HttpRequest::get("/state"))
            .with_predicate(SuccessPredicate::OutputMatches("ONLINE".into()));
        assert!(executor.run_one(&op).await.is_err());
    }
}
