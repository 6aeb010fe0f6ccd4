//! Log Redaction Layer
//!
//! Scrubs bearer credentials and access tokens from strings prior to logging.

use once_cell::sync::Lazy;
use regex::Regex;

static BEARER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Bearer\s+[A-Za-z0-9\-._~+/]+=*").expect("static regex"));

// JSON (`"accessToken": "..."`) and key=value (`access_token=...`) spellings.
static ACCESS_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)("?access_?token"?\s*[:=]\s*"?)[^"\s,}&]+"#).expect("static regex")
});

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = BEARER_RE.replace_all(input, "Bearer [REDACTED_TOKEN]");
    ACCESS_TOKEN_RE
        .replace_all(&redacted, "${1}[REDACTED_TOKEN]")
        .into_owned()
}
