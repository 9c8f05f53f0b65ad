//! Record id sanitizing

use std::sync::LazyLock;

use regex::Regex;

/// Maximum length of a record id
pub const MAX_ID_LEN: usize = 50;

/// Id used when nothing survives sanitizing
pub const UNNAMED_ID: &str = "unnamed";

static WHITESPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("WHITESPACE_RUNS is a valid regex pattern"));

/// Turns an arbitrary label into a record id.
///
/// Lower-cases, replaces whitespace runs with `_`, drops everything outside
/// `[a-z0-9_.-]` and truncates to [`MAX_ID_LEN`]. An empty result becomes
/// [`UNNAMED_ID`]. Applying it twice gives the same id as applying it once.
#[must_use]
pub fn sanitize_id(label: &str) -> String {
    let lowered = label.to_lowercase();
    let joined = WHITESPACE_RUNS.replace_all(&lowered, "_");
    let mut id: String = joined
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
        .take(MAX_ID_LEN)
        .collect();
    if id.is_empty() {
        id.push_str(UNNAMED_ID);
    }
    id
}

/// Whether `id` is already in sanitized form
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
}

/// Appends `_{n}` to `base`, shortening `base` so the result fits
#[must_use]
pub fn with_suffix(base: &str, n: usize) -> String {
    let suffix = format!("_{n}");
    let keep = MAX_ID_LEN.saturating_sub(suffix.len());
    let mut id: String = base.chars().take(keep).collect();
    id.push_str(&suffix);
    id
}
