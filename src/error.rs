use thiserror::Error;

use crate::config::ConfigError;
use crate::job::ResourceError;
use crate::kyuubi::SubmissionError;

/// Exit status for any error that stops the run before a verdict exists.
pub const EXIT_FAILURE: i32 = 1;

/// Fatal errors of a submission run, one variant per taxonomy bucket.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("submission error: {0}")]
    Submission(#[from] SubmissionError),
}

impl SubmitError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SubmitError::Config(_) | SubmitError::Resource(_) | SubmitError::Submission(_) => {
                EXIT_FAILURE
            }
        }
    }
}
