pub mod poller;
pub mod state;

pub use poller::{Monitor, MonitorObserver, MonitorSummary};
pub use state::Verdict;

#[cfg(test)]
pub(crate) use poller::tests::ScriptedApi;
