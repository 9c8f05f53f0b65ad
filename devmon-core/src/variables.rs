//! Cycle-scoped variables and `${name}` substitution
//!
//! Operations are written as templates: `${username}`, `${password}`,
//! `${token}` and per-record fields such as `${id}` are filled in right
//! before an operation is sent. Secret values are held as [`SecretString`]
//! and exposed only while rendering.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use secrecy::{ExposeSecret, SecretString};

/// Cached regex for variable extraction: matches `${var_name}` patterns
static VARIABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("VARIABLE_REGEX is a valid regex pattern")
});

/// Well-known variable names populated by the session
pub mod names {
    /// Account name
    pub const USERNAME: &str = "username";
    /// Account secret
    pub const PASSWORD: &str = "password";
    /// One-time or session token
    pub const TOKEN: &str = "token";
    /// Target address
    pub const ADDRESS: &str = "address";
}

#[derive(Debug, Clone)]
enum Value {
    Plain(String),
    Secret(SecretString),
}

/// Variable map for one polling cycle
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: HashMap<String, Value>,
}

impl Variables {
    /// Creates an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a plain variable
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), Value::Plain(value.into()));
    }

    /// Sets a secret variable
    pub fn set_secret(&mut self, name: impl Into<String>, value: SecretString) {
        self.values.insert(name.into(), Value::Secret(value));
    }

    /// Returns a copy extended with `other`'s entries (other wins)
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { values }
    }

    /// Whether a variable is defined
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Plain value of a variable; secrets are not returned
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            Value::Plain(v) => Some(v),
            Value::Secret(_) => None,
        }
    }

    /// Substitutes all `${name}` references.
    ///
    /// Undefined references are left untouched so a later stage can still
    /// fill them (e.g. `${token}` before the token is known).
    #[must_use]
    pub fn substitute(&self, input: &str) -> String {
        if !input.contains("${") {
            return input.to_string();
        }
        VARIABLE_REGEX
            .replace_all(input, |caps: &Captures<'_>| {
                match self.values.get(&caps[1]) {
                    Some(Value::Plain(v)) => v.clone(),
                    Some(Value::Secret(s)) => s.expose_secret().to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Names referenced in `input`, in order of first appearance
    #[must_use]
    pub fn references(input: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for cap in VARIABLE_REGEX.captures_iter(input) {
            let name = cap[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}
