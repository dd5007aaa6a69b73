//! Error type for calls against the Kyuubi batch REST API.
//!
//! Every variant that originates from an HTTP exchange keeps the status code
//! and the raw response body so a failed submission can be diagnosed without
//! access to the server logs.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`KyuubiClient`](super::KyuubiClient).
///
/// None of these are retried by the client itself. The monitor's poll loop
/// is the only caller that retries, and only for status calls.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Connection refused, DNS failure, timeout or TLS handshake failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned status {status}: {body}")]
    Api { status: u16, body: String },

    /// The server answered 2xx but the body could not be decoded.
    #[error("malformed response (status {status}): {reason}; body: {body}")]
    Malformed {
        status: u16,
        body: String,
        reason: String,
    },

    /// A local resource could not be read while building the upload.
    #[error("failed to read {} for upload: {source}", path.display())]
    Upload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl SubmissionError {
    /// HTTP status attached to the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            SubmissionError::Api { status, .. } | SubmissionError::Malformed { status, .. } => {
                Some(*status)
            }
            SubmissionError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
