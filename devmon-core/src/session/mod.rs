//! Authenticated sessions
//!
//! A [`Session`] is created by the [`SessionManager`] at the start of a
//! polling cycle and threaded explicitly through every operation of that
//! cycle. It holds the credential material, the artifact the device handed
//! out at login (token, cookie, header) and, for interactive shells, the
//! prompt seen after login. Nothing here outlives the cycle.

mod extract;
mod manager;

pub use extract::ArtifactExtractor;
pub use manager::{MAX_LOGIN_REDIRECTS, SessionManager};

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::operation::{AttachedCredential, Operation};
use crate::transport::TransportKind;
use crate::variables::{Variables, names};

/// Account credentials for one device
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account secret
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials
    #[must_use]
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// `${username}` and `${password}` for login templates
    #[must_use]
    pub fn variables(&self) -> Variables {
        let mut vars = Variables::new();
        vars.set(names::USERNAME, self.username.clone());
        vars.set_secret(names::PASSWORD, self.password.clone());
        vars
    }
}

/// What a session presents on each operation
#[derive(Debug, Clone)]
pub enum CredentialArtifact {
    /// Nothing beyond the transport itself (key-based shells, authenticated
    /// channels, cookie jars)
    None,
    /// Per-call basic authentication
    Basic,
    /// In-band username and password lines
    Login,
    /// `Authorization: Bearer` token
    Bearer(SecretString),
    /// Named cookie
    Cookie {
        /// Cookie name
        name: String,
        /// Cookie value
        value: SecretString,
    },
    /// Custom header
    Header {
        /// Header name
        name: String,
        /// Header value
        value: SecretString,
    },
}

impl CredentialArtifact {
    /// The token value, if the artifact carries one
    #[must_use]
    pub const fn token(&self) -> Option<&SecretString> {
        match self {
            Self::Bearer(value) | Self::Cookie { value, .. } | Self::Header { value, .. } => {
                Some(value)
            }
            Self::None | Self::Basic | Self::Login => None,
        }
    }
}

/// How an extracted login artifact is presented on later requests
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Presentation {
    /// `Authorization: Bearer <token>`
    #[default]
    Bearer,
    /// `<name>: <token>`
    Header {
        /// Header name
        name: String,
    },
    /// `Cookie: <name>=<token>`
    Cookie {
        /// Cookie name
        name: String,
    },
    /// The transport's cookie jar already carries it
    Jar,
}

impl Presentation {
    /// Wraps an extracted value
    #[must_use]
    pub fn artifact(&self, value: String) -> CredentialArtifact {
        let value = SecretString::from(value);
        match self {
            Self::Bearer => CredentialArtifact::Bearer(value),
            Self::Header { name } => CredentialArtifact::Header {
                name: name.clone(),
                value,
            },
            Self::Cookie { name } => CredentialArtifact::Cookie {
                name: name.clone(),
                value,
            },
            Self::Jar => CredentialArtifact::None,
        }
    }
}

/// Form login with an anti-forgery token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiStepLogin {
    /// Page that carries the anti-forgery token
    pub token_page: Operation,
    /// Where the anti-forgery token is found
    pub token: ArtifactExtractor,
    /// Credential submission; may reference `${token}`
    pub submit: Operation,
    /// Where the session artifact is found
    pub artifact: ArtifactExtractor,
    /// How the artifact is presented
    #[serde(default)]
    pub present: Presentation,
    /// Optional request that must succeed with the new artifact
    #[serde(default)]
    pub confirm: Option<Operation>,
}

/// One line of an interactive login dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptStep {
    /// Line to send; `None` only waits
    #[serde(default)]
    pub send: Option<String>,
    /// Pattern that completes the step
    pub expect: String,
    /// Pattern meaning the device rejected the credentials
    #[serde(default)]
    pub reject: Option<String>,
}

/// How a session is established
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AuthStrategy {
    /// Credentials travel with every call; no login exchange
    #[default]
    Stateless,
    /// One login request, artifact extracted from its response
    SingleCall {
        /// Login request; may reference `${username}` and `${password}`
        request: Operation,
        /// Where the artifact is found
        extractor: ArtifactExtractor,
        /// How the artifact is presented
        #[serde(default)]
        present: Presentation,
    },
    /// Token page, form submit and redirect handling
    MultiStep(MultiStepLogin),
    /// Interactive login on a shell channel
    Prompt {
        /// Dialogue steps, in order
        steps: Vec<PromptStep>,
    },
}

impl AuthStrategy {
    /// Strategy name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stateless => "stateless",
            Self::SingleCall { .. } => "single_call",
            Self::MultiStep(_) => "multi_step",
            Self::Prompt { .. } => "prompt",
        }
    }
}

/// An authenticated session, valid for one polling cycle
#[derive(Debug, Clone)]
pub struct Session {
    /// Transport family the session was established on
    pub kind: TransportKind,
    /// Credential material
    pub credentials: Credentials,
    /// Artifact presented on each operation
    pub artifact: CredentialArtifact,
    /// Prompt seen after an interactive login
    pub prompt: Option<String>,
    /// When the login completed
    pub created_at: DateTime<Utc>,
    /// Logins performed by the manager so far, this one included
    pub logins: u32,
    /// Incremented on every (re-)login
    pub generation: u64,
}

impl Session {
    /// Session variables: `${username}`, `${password}` and, once a token
    /// artifact exists, `${token}`
    #[must_use]
    pub fn variables(&self) -> Variables {
        let mut vars = self.credentials.variables();
        if let Some(token) = self.artifact.token() {
            vars.set_secret(names::TOKEN, token.clone());
        }
        vars
    }

    /// Renders `operation` with the session variables and attaches the
    /// artifact
    #[must_use]
    pub fn authorize(&self, operation: &Operation) -> Operation {
        let mut authorized = operation.render(&self.variables());
        authorized.credential = self.attached_credential();
        authorized
    }

    fn attached_credential(&self) -> Option<AttachedCredential> {
        let username = || self.credentials.username.clone();
        let password = || self.credentials.password.clone();
        match &self.artifact {
            CredentialArtifact::None => None,
            CredentialArtifact::Basic => Some(AttachedCredential::Basic {
                username: username(),
                password: password(),
            }),
            CredentialArtifact::Login => Some(AttachedCredential::Login {
                username: username(),
                password: password(),
            }),
            CredentialArtifact::Bearer(token) => Some(AttachedCredential::Bearer(token.clone())),
            CredentialArtifact::Cookie { name, value } => Some(AttachedCredential::Cookie {
                name: name.clone(),
                value: value.clone(),
            }),
            CredentialArtifact::Header { name, value } => Some(AttachedCredential::Header {
                name: name.clone(),
                value: value.clone(),
            }),
        }
    }

    /// Whether the artifact is a token that could expire
    #[must_use]
    pub const fn has_token(&self) -> bool {
        self.artifact.token().is_some()
    }

    /// Exposes the token for diagnostics that must compare values
    #[cfg(test)]
    pub(crate) fn token_value(&self) -> Option<&str> {
        self.artifact.token().map(secrecy::ExposeSecret::expose_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{HttpRequest, Target};

    fn session(artifact: CredentialArtifact) -> Session {
        Session {
            kind: TransportKind::Http,
            credentials: Credentials::new("admin", SecretString::from("pw")),
            artifact,
            prompt: None,
            created_at: Utc::now(),
            logins: 1,
            generation: 1,
        }
    }

    #[test]
    fn test_authorize_renders_and_attaches_bearer() {
        let s = session(CredentialArtifact::Bearer(SecretString::from("tok")));
        let op = Operation::http(
            "status",
            HttpRequest::get("/api/${username}/status").with_query("t", "${token}"),
        );
        let authorized = s.authorize(&op);

        let Target::Http(req) = &authorized.target else {
            panic!("expected http target");
        };
        assert_eq!(req.path, "/api/admin/status");
        assert_eq!(req.query[0].1, "tok");
        assert!(matches!(
            authorized.credential,
            Some(AttachedCredential::Bearer(_))
        ));
        // The template itself is untouched
        assert!(op.credential.is_none());
    }

    #[test]
    fn test_jar_presentation_attaches_nothing() {
        let artifact = Presentation::Jar.artifact("abc".into());
        let s = session(artifact);
        assert!(s.authorize(&Operation::command("x", "true")).credential.is_none());
        assert!(!s.has_token());
    }

    #[test]
    fn test_cookie_presentation() {
        let artifact = Presentation::Cookie {
            name: "SID".into(),
        }
        .artifact("v1".into());
        let s = session(artifact);
        assert_eq!(s.token_value(), Some("v1"));
    }

    #[test]
    fn test_strategy_from_toml() {
        let strategy: AuthStrategy = toml::from_str(
            r#"
            strategy = "single_call"
            extractor = { kind = "json_pointer", pointer = "/token" }
            present = { kind = "header", name = "X-Auth" }
            [request]
            name = "login"
            [request.target]
            kind = "http"
            method = "POST"
            path = "/api/login"
            body = '{"user":"${username}","pass":"${password}"}'
            "#,
        )
        .unwrap();
        assert_eq!(strategy.name(), "single_call");
        let AuthStrategy::SingleCall { present, .. } = strategy else {
            panic!("expected single call");
        };
        assert_eq!(
            present,
            Presentation::Header {
                name: "X-Auth".into()
            }
        );
    }
}
