//! Cleanup of raw text captured from a remote shell.
//!
//! Each pass is a function `&str -> String` applied in sequence. Every pass
//! is idempotent and none can reintroduce what an earlier pass removed, so
//! the whole pipeline is idempotent too.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full sanitize pipeline on fetched document text.
pub fn sanitize(raw: &str) -> String {
    let mut result = strip_ansi_sequences(raw);

    result = strip_bom(&result);
    result = normalize_line_endings(&result);
    result = strip_control_chars(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: ANSI escape sequences (login banners, colored motd)
// ---------------------------------------------------------------------------

fn strip_ansi_sequences(text: &str) -> String {
    static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
        // CSI sequences and two-byte escapes
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[@-Z\\-_]").expect("valid regex")
    });

    ANSI_RE.replace_all(text, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 2: byte order mark
// ---------------------------------------------------------------------------

fn strip_bom(text: &str) -> String {
    text.trim_start_matches('\u{feff}').to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: CRLF / lone CR
// ---------------------------------------------------------------------------

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "")
}

// ---------------------------------------------------------------------------
// Pass 4: remaining control characters
// ---------------------------------------------------------------------------

/// Drop C0/C1 controls and DEL, keeping newline and tab.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 5: exactly one trailing newline
// ---------------------------------------------------------------------------

fn ensure_trailing_newline(text: &str) -> String {
    let trimmed = text.trim_end_matches('\n');
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed}\n")
}
