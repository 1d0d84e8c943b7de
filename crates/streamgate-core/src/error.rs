//! Error taxonomy shared by the core and its collaborators.

use thiserror::Error;

// ── Collaborator failures ───────────────────────────────────────────

/// A usage, session or policy call failed.
///
/// The core never propagates these out of a cycle; each call site turns
/// them into a degraded value (zero usage, empty session list, skipped user).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {code}")]
    Status { code: u16 },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("not supported: {0}")]
    Unsupported(&'static str),
}

// ── Limit application ───────────────────────────────────────────────

/// A mutation issued while applying a limit failed.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("policy write for user {user_id} failed: {source}")]
    PolicyWrite {
        user_id: String,
        #[source]
        source: SourceError,
    },
    #[error("stop of session {session_id} failed: {source}")]
    Stop {
        session_id: String,
        #[source]
        source: SourceError,
    },
    #[error("resume of session {session_id} failed: {source}")]
    Resume {
        session_id: String,
        #[source]
        source: SourceError,
    },
}

// ── Configuration ───────────────────────────────────────────────────

/// Startup-fatal configuration problem.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
