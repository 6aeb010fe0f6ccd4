//! Structured logging for the hub.
//!
//! Console plus rolling NDJSON file output, and redaction of credentials in
//! free-form strings before they reach a log line.

pub mod logger;
pub mod redact;

pub use logger::init_logger;
pub use redact::redact_sensitive_data;
