//! Pulling tokens and cookies out of login responses

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::operation::RawResult;

/// Where an artifact (session token, anti-forgery token, cookie) is found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactExtractor {
    /// JSON pointer into the response body, e.g. `/data/token`
    JsonPointer {
        /// RFC 6901 pointer
        pointer: String,
    },
    /// A response header
    Header {
        /// Header name (case-insensitive)
        name: String,
    },
    /// A cookie from `Set-Cookie`
    Cookie {
        /// Cookie name
        name: String,
    },
    /// First capture group of a regex over the body
    Regex {
        /// Pattern with at least one capture group
        pattern: String,
    },
}

impl ArtifactExtractor {
    /// Extracts the value, or `None` when absent or empty
    #[must_use]
    pub fn extract(&self, result: &RawResult) -> Option<String> {
        let value = match self {
            Self::JsonPointer { pointer } => {
                let doc: serde_json::Value = serde_json::from_str(&result.body).ok()?;
                match doc.pointer(pointer)? {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                }
            }
            Self::Header { name } => result.header(name)?.trim().to_string(),
            Self::Cookie { name } => result
                .header_values("set-cookie")
                .find_map(|cookie| cookie_value(cookie, name))?,
            Self::Regex { pattern } => {
                let re = Regex::new(pattern).ok()?;
                re.captures(&result.body)?.get(1)?.as_str().to_string()
            }
        };
        (!value.is_empty()).then_some(value)
    }

    /// Short description for log messages
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::JsonPointer { pointer } => format!("json pointer {pointer}"),
            Self::Header { name } => format!("header {name}"),
            Self::Cookie { name } => format!("cookie {name}"),
            Self::Regex { pattern } => format!("pattern {pattern}"),
        }
    }
}

/// Value of cookie `name` in one `Set-Cookie` header
fn cookie_value(set_cookie: &str, name: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?;
    let (key, value) = pair.split_once('=')?;
    (key.trim() == name).then(|| value.trim().trim_matches('"').to_string())
}
