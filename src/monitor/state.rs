use std::fmt;

use crate::kyuubi::{Batch, SubmissionError};

/// Batch lifecycle states reported by the server.
///
/// The set is closed: anything the server sends that is not listed here
/// lands in [`BatchState::Unrecognized`] and ends monitoring as
/// [`Verdict::Unexpected`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchState {
    Initialized,
    Pending,
    Running,
    Finished,
    Error,
    Timeout,
    Cancelled,
    Unrecognized(String),
}

impl BatchState {
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = raw.map(str::trim).unwrap_or_default();
        match raw.to_ascii_uppercase().as_str() {
            "INITIALIZED" => BatchState::Initialized,
            "PENDING" => BatchState::Pending,
            "RUNNING" => BatchState::Running,
            "FINISHED" => BatchState::Finished,
            "ERROR" => BatchState::Error,
            "TIMEOUT" => BatchState::Timeout,
            "CANCELED" | "CANCELLED" => BatchState::Cancelled,
            _ => BatchState::Unrecognized(raw.to_string()),
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Initialized => write!(f, "INITIALIZED"),
            BatchState::Pending => write!(f, "PENDING"),
            BatchState::Running => write!(f, "RUNNING"),
            BatchState::Finished => write!(f, "FINISHED"),
            BatchState::Error => write!(f, "ERROR"),
            BatchState::Timeout => write!(f, "TIMEOUT"),
            BatchState::Cancelled => write!(f, "CANCELED"),
            BatchState::Unrecognized(raw) if raw.is_empty() => write!(f, "<absent>"),
            BatchState::Unrecognized(raw) => write!(f, "{raw}"),
        }
    }
}

/// Spark application state, as far as it matters once the batch finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    Absent,
    Succeeded,
    Failed(String),
    Other(String),
}

impl AppState {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return AppState::Absent;
        };
        match raw.to_ascii_uppercase().as_str() {
            "FINISHED" | "SUCCESS" | "SUCCEEDED" => AppState::Succeeded,
            "FAILED" | "ERROR" | "KILLED" => AppState::Failed(raw.to_string()),
            _ => AppState::Other(raw.to_string()),
        }
    }
}

/// Terminal classification of a monitored batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failed { reason: String },
    Cancelled,
    Unexpected { reason: String },
}

impl Verdict {
    /// Process exit status for this verdict.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Success => 0,
            Verdict::Failed { .. } => 1,
            Verdict::Cancelled => 2,
            Verdict::Unexpected { .. } => 3,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Success => write!(f, "succeeded"),
            Verdict::Failed { reason } => write!(f, "failed: {reason}"),
            Verdict::Cancelled => write!(f, "cancelled"),
            Verdict::Unexpected { reason } => write!(f, "ended in an unexpected state: {reason}"),
        }
    }
}

/// Maps one status snapshot to a verdict, or `None` while the batch is
/// still in flight.
pub fn evaluate(batch: &Batch) -> Option<Verdict> {
    let state = BatchState::parse(batch.state.as_deref());
    match state {
        BatchState::Initialized | BatchState::Pending | BatchState::Running => None,
        BatchState::Finished => Some(match AppState::parse(batch.app_state()) {
            AppState::Absent | AppState::Succeeded => Verdict::Success,
            // The batch claims completion but the application did not succeed.
            AppState::Failed(app) => Verdict::Failed {
                reason: format!("batch FINISHED but application state is {app}"),
            },
            AppState::Other(app) => Verdict::Unexpected {
                reason: format!("batch FINISHED with unrecognized application state {app}"),
            },
        }),
        BatchState::Error | BatchState::Timeout => Some(Verdict::Failed {
            reason: format!("batch state {state}"),
        }),
        BatchState::Cancelled => Some(Verdict::Cancelled),
        BatchState::Unrecognized(_) => Some(Verdict::Unexpected {
            reason: format!("unrecognized batch state {state}"),
        }),
    }
}

/// The result of feeding one poll into the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Batch still in flight; poll again.
    Continue(BatchState),
    /// The status call failed but the failure budget is not spent.
    Retry {
        consecutive_failures: u32,
        error: String,
    },
    /// Monitoring is over.
    Complete(Verdict),
}

/// Folds status polls into a terminal [`Verdict`].
///
/// Consecutive poll failures are counted; any successful poll resets the
/// count, and reaching `max_failures` completes with
/// [`Verdict::Unexpected`] carrying the last error. Once complete, the
/// machine keeps returning the same verdict.
#[derive(Debug, Clone)]
pub struct MonitorMachine {
    max_failures: u32,
    consecutive_failures: u32,
    polls: u32,
    verdict: Option<Verdict>,
}

impl MonitorMachine {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
            consecutive_failures: 0,
            polls: 0,
            verdict: None,
        }
    }

    pub fn next(&mut self, observation: Result<&Batch, &SubmissionError>) -> Transition {
        if let Some(verdict) = &self.verdict {
            return Transition::Complete(verdict.clone());
        }
        self.polls += 1;

        let transition = match observation {
            Ok(batch) => {
                self.consecutive_failures = 0;
                match evaluate(batch) {
                    Some(verdict) => Transition::Complete(verdict),
                    None => Transition::Continue(BatchState::parse(batch.state.as_deref())),
                }
            }
            Err(error) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.max_failures {
                    Transition::Complete(Verdict::Unexpected {
                        reason: format!(
                            "status polling failed {} consecutive times, last error: {error}",
                            self.consecutive_failures
                        ),
                    })
                } else {
                    Transition::Retry {
                        consecutive_failures: self.consecutive_failures,
                        error: error.to_string(),
                    }
                }
            }
        };

        if let Transition::Complete(verdict) = &transition {
            self.verdict = Some(verdict.clone());
        }
        transition
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }
}
