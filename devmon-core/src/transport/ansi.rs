//! Control-sequence stripping for terminal output
//!
//! Interactive devices decorate their output with ANSI/VT escape sequences
//! (cursor movement, colors, screen clears) and, over raw telnet, with IAC
//! option negotiation. Both are removed before any pattern is matched.

use std::sync::LazyLock;

use regex::Regex;

/// CSI, OSC and two-byte escape sequences
static ESCAPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-?]*[ -/]*[@-~]",
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        r"|\x1b[@-Z\\-_]",
        r"|\x1b[()][0-9A-Za-z]",
    ))
    .expect("ESCAPE_REGEX is a valid regex pattern")
});

/// Telnet "interpret as command" byte
pub const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Removes escape sequences and non-printing control characters.
///
/// Line feeds and tabs survive; carriage returns are dropped so `\r\n`
/// becomes `\n`.
#[must_use]
pub fn strip_control_sequences(input: &str) -> String {
    let without_escapes = ESCAPE_REGEX.replace_all(input, "");
    without_escapes
        .chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect()
}

/// Splits cleaned output into non-empty, trimmed blocks on `boundary`
#[must_use]
pub fn split_blocks(output: &str, boundary: &Regex) -> Vec<String> {
    boundary
        .split(output)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

/// Removes telnet negotiation from `input`.
///
/// Returns the payload bytes and the refusal replies to send back: every
/// `DO` is answered with `WONT` and every `WILL` with `DONT`, which keeps
/// the peer in plain line mode.
#[must_use]
pub fn strip_telnet_negotiation(input: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut data = Vec::with_capacity(input.len());
    let mut replies = Vec::new();
    let mut i = 0;

    while i < input.len() {
        if input[i] != IAC {
            data.push(input[i]);
            i += 1;
            continue;
        }
        match input.get(i + 1).copied() {
            Some(IAC) => {
                data.push(IAC);
                i += 2;
            }
            Some(cmd @ (DO | DONT | WILL | WONT)) => {
                if let Some(&option) = input.get(i + 2) {
                    match cmd {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                }
                i += 3;
            }
            Some(SB) => {
                // Skip subnegotiation up to IAC SE
                let mut j = i + 2;
                while j + 1 < input.len() && !(input[j] == IAC && input[j + 1] == SE) {
                    j += 1;
                }
                i = j + 2;
            }
            Some(_) => i += 2,
            None => i += 1,
        }
    }

    (data, replies)
}
