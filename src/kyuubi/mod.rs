pub mod client;
pub mod error;
pub mod types;

pub use client::{BatchApi, KyuubiClient};
pub use error::SubmissionError;
pub use types::Batch;
