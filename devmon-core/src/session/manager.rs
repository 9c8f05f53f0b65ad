//! Session manager
//!
//! Runs the configured [`AuthStrategy`] against an open transport and keeps
//! the resulting [`Session`] for the rest of the cycle. Re-login is
//! serialized: operations that all observe an expired token trigger a single
//! renewal, the others pick up the renewed session by its generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tokio::sync::{Mutex, RwLock};
use tracing::Instrument;

use super::{
    AuthStrategy, CredentialArtifact, Credentials, MultiStepLogin, PromptStep, Session,
};
use crate::classify::{ClassifiedError, ErrorClassification, FailureSignal, classify};
use crate::operation::{HttpRequest, Operation, RawResult, ShellInput, SuccessPredicate};
use crate::tracing::span_names;
use crate::transport::{Transport, TransportKind};
use crate::variables::{Variables, names};

/// Redirects followed manually during a multi-step login
pub const MAX_LOGIN_REDIRECTS: u32 = 5;

/// Margin on top of a login request's own timeout
const LOGIN_GRACE: Duration = Duration::from_millis(250);

/// Establishes and renews sessions for one device
#[derive(Debug)]
pub struct SessionManager {
    strategy: AuthStrategy,
    credentials: Credentials,
    current: RwLock<Option<Arc<Session>>>,
    login_lock: Mutex<()>,
    logins: AtomicU32,
}

impl SessionManager {
    /// Creates a manager; no login happens until [`Self::login`]
    #[must_use]
    pub fn new(strategy: AuthStrategy, credentials: Credentials) -> Self {
        Self {
            strategy,
            credentials,
            current: RwLock::new(None),
            login_lock: Mutex::new(()),
            logins: AtomicU32::new(0),
        }
    }

    /// The configured strategy
    #[must_use]
    pub const fn strategy(&self) -> &AuthStrategy {
        &self.strategy
    }

    /// Logins performed so far
    #[must_use]
    pub fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    /// The current session, if logged in
    pub async fn current(&self) -> Option<Arc<Session>> {
        self.current.read().await.clone()
    }

    /// Logs in and stores the session.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationError` when the device rejects the login, or
    /// `ResourceUnavailable` when it cannot be reached.
    pub async fn login(&self, transport: &dyn Transport) -> Result<Arc<Session>, ClassifiedError> {
        let _guard = self.login_lock.lock().await;
        self.establish(transport).await
    }

    /// Renews a session whose token expired.
    ///
    /// When another operation already renewed the session past
    /// `stale_generation`, that session is returned without a new login.
    ///
    /// # Errors
    ///
    /// Same as [`Self::login`].
    pub async fn relogin(
        &self,
        transport: &dyn Transport,
        stale_generation: u64,
    ) -> Result<Arc<Session>, ClassifiedError> {
        let _guard = self.login_lock.lock().await;
        if let Some(current) = self.current().await
            && current.generation > stale_generation
        {
            tracing::debug!(
                generation = current.generation,
                "Session already renewed by a concurrent operation"
            );
            return Ok(current);
        }
        tracing::info!(stale_generation, "Session token expired, logging in again");
        self.establish(transport).await
    }

    async fn establish(&self, transport: &dyn Transport) -> Result<Arc<Session>, ClassifiedError> {
        let span = tracing::info_span!(
            span_names::SESSION_LOGIN,
            strategy = self.strategy.name(),
            transport = %transport.kind(),
            user = %self.credentials.username,
        );

        async {
            let result = self.authenticate(transport).await;
            let (artifact, prompt) = match result {
                Ok(established) => established,
                Err(e) => {
                    *self.current.write().await = None;
                    tracing::warn!(classification = %e.classification, error = %e.message, "Login failed");
                    return Err(e);
                }
            };

            let generation = self.current().await.map_or(1, |s| s.generation + 1);
            let session = Arc::new(Session {
                kind: transport.kind(),
                credentials: self.credentials.clone(),
                artifact,
                prompt,
                created_at: Utc::now(),
                logins: self.login_count() + 1,
                generation,
            });

            if let AuthStrategy::MultiStep(login) = &self.strategy
                && let Some(confirm) = &login.confirm
            {
                let op = session.authorize(confirm);
                let response = send_login(transport, &op).await?;
                check_response(&op, &response, Some(&op.predicate))?;
            }

            self.logins.fetch_add(1, Ordering::SeqCst);
            *self.current.write().await = Some(Arc::clone(&session));
            tracing::info!(generation, "Session established");
            Ok(session)
        }
        .instrument(span)
        .await
    }

    async fn authenticate(
        &self,
        transport: &dyn Transport,
    ) -> Result<(CredentialArtifact, Option<String>), ClassifiedError> {
        match &self.strategy {
            AuthStrategy::Stateless => {
                let artifact = match transport.kind() {
                    TransportKind::Http => CredentialArtifact::Basic,
                    TransportKind::Terminal => CredentialArtifact::Login,
                    TransportKind::Shell | TransportKind::Command => CredentialArtifact::None,
                };
                Ok((artifact, None))
            }
            AuthStrategy::SingleCall {
                request,
                extractor,
                present,
            } => {
                let op = request.render(&self.credentials.variables());
                let response = send_login(transport, &op).await?;
                check_response(&op, &response, Some(&op.predicate))?;
                let value = extractor.extract(&response).ok_or_else(|| {
                    ClassifiedError::authentication(format!(
                        "{}: no {} in login response",
                        op.name,
                        extractor.describe()
                    ))
                })?;
                Ok((present.artifact(value), None))
            }
            AuthStrategy::MultiStep(login) => {
                let artifact = self.multi_step(transport, login).await?;
                Ok((artifact, None))
            }
            AuthStrategy::Prompt { steps } => {
                let prompt = self.prompt_dialogue(transport, steps).await?;
                Ok((CredentialArtifact::None, prompt))
            }
        }
    }

    async fn multi_step(
        &self,
        transport: &dyn Transport,
        login: &MultiStepLogin,
    ) -> Result<CredentialArtifact, ClassifiedError> {
        let base = self.credentials.variables();

        let page_op = login.token_page.render(&base);
        let page = send_login(transport, &page_op).await?;
        check_response(&page_op, &page, Some(&page_op.predicate))?;
        let mut token = login.token.extract(&page).ok_or_else(|| {
            ClassifiedError::authentication(format!(
                "{}: no anti-forgery token ({})",
                page_op.name,
                login.token.describe()
            ))
        })?;

        let mut response = submit(transport, &login.submit, &base, &token).await?;
        let mut artifact = login.artifact.extract(&response);
        let mut redirects = 0;

        while let Some(location) = response.redirect_location().map(str::to_string) {
            if redirects == MAX_LOGIN_REDIRECTS {
                return Err(ClassifiedError::authentication(format!(
                    "{}: more than {MAX_LOGIN_REDIRECTS} redirects",
                    login.submit.name
                )));
            }
            redirects += 1;

            let follow = Operation::http(
                format!("{} redirect", login.submit.name),
                HttpRequest::get(location.as_str()),
            )
            .with_timeout(login.submit.timeout())
            .with_predicate(SuccessPredicate::Any);
            let landed = send_login(transport, &follow).await?;
            check_response(&follow, &landed, None)?;
            if let Some(found) = login.artifact.extract(&landed) {
                artifact = Some(found);
            }

            match login.token.extract(&landed).filter(|fresh| *fresh != token) {
                Some(fresh) => {
                    tracing::debug!(%location, "Fresh anti-forgery token after redirect, resubmitting");
                    token = fresh;
                    response = submit(transport, &login.submit, &base, &token).await?;
                    if let Some(found) = login.artifact.extract(&response) {
                        artifact = Some(found);
                    }
                }
                None => response = landed,
            }
        }

        let value = artifact.ok_or_else(|| {
            ClassifiedError::authentication(format!(
                "{}: no {} after login",
                login.submit.name,
                login.artifact.describe()
            ))
        })?;
        Ok(login.present.artifact(value))
    }

    async fn prompt_dialogue(
        &self,
        transport: &dyn Transport,
        steps: &[PromptStep],
    ) -> Result<Option<String>, ClassifiedError> {
        if transport.kind() != TransportKind::Shell {
            return Err(ClassifiedError::generic(format!(
                "prompt login needs a shell transport, not {}",
                transport.kind()
            )));
        }

        let vars = self.credentials.variables();
        let mut prompt = None;

        for (index, step) in steps.iter().enumerate() {
            let reject = step
                .reject
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| ClassifiedError::generic(format!("login step {index}: {e}")))?;
            let terminator = match &step.reject {
                Some(reject) => format!("(?:{})|(?:{reject})", step.expect),
                None => step.expect.clone(),
            };
            let op = Operation::shell(
                format!("login step {index}"),
                ShellInput {
                    lines: step.send.iter().map(|line| vars.substitute(line)).collect(),
                    terminator,
                    ..ShellInput::default()
                },
            );

            let response = send_login(transport, &op).await?;
            if reject.is_some_and(|re| re.is_match(&response.body)) {
                return Err(ClassifiedError::from_signal(
                    &FailureSignal::CredentialRejected,
                    format!("{}: device rejected the credentials", op.name),
                ));
            }
            prompt = response.matched_terminator;
        }

        Ok(prompt.map(|p| p.trim().to_string()))
    }
}

/// Submits the credential form with the current anti-forgery token
async fn submit(
    transport: &dyn Transport,
    template: &Operation,
    base: &Variables,
    token: &str,
) -> Result<RawResult, ClassifiedError> {
    let mut vars = Variables::new();
    vars.set(names::TOKEN, token);
    let op = template.render(&base.merged(&vars));
    let response = send_login(transport, &op).await?;
    check_response(&op, &response, None)?;
    Ok(response)
}

/// Sends one login request; failures become `AuthenticationError` unless the
/// device is unavailable
async fn send_login(
    transport: &dyn Transport,
    op: &Operation,
) -> Result<RawResult, ClassifiedError> {
    match tokio::time::timeout(op.timeout() + LOGIN_GRACE, transport.send(op)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(login_failure(e.classified(&op.name))),
        Err(_) => Err(login_failure(ClassifiedError::from_signal(
            &FailureSignal::Timeout {
                partial_data: false,
            },
            format!("{}: no response within {}ms", op.name, op.timeout_ms),
        ))),
    }
}

fn login_failure(error: ClassifiedError) -> ClassifiedError {
    match error.classification {
        ErrorClassification::ResourceUnavailable | ErrorClassification::AuthenticationError => {
            error
        }
        _ => ClassifiedError::authentication(format!("login failed: {}", error.message)),
    }
}

/// Rejects auth and availability statuses, then applies `predicate`
fn check_response(
    op: &Operation,
    response: &RawResult,
    predicate: Option<&SuccessPredicate>,
) -> Result<(), ClassifiedError> {
    if let Some(status) = response.status {
        match classify(&FailureSignal::Status(status)) {
            ErrorClassification::AuthenticationError => {
                return Err(ClassifiedError::authentication(format!(
                    "{}: login rejected with status {status}",
                    op.name
                )));
            }
            ErrorClassification::ResourceUnavailable => {
                return Err(ClassifiedError::unavailable(format!(
                    "{}: status {status}",
                    op.name
                )));
            }
            _ => {}
        }
    }
    if let Some(predicate) = predicate
        && !predicate.evaluate(response)
    {
        return Err(ClassifiedError::authentication(format!(
            "{}: unexpected login response{}",
            op.name,
            response
                .status
                .map_or_else(String::new, |s| format!(" (status {s})"))
        )));
    }
    Ok(())
}
