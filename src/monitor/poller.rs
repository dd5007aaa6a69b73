use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::debug;

use super::state::{MonitorMachine, Transition, Verdict};
use crate::job::{MonitorSettings, history_app_url};
use crate::kyuubi::{Batch, BatchApi, SubmissionError};

/// Receives the per-poll side effects of [`Monitor::run`].
pub trait MonitorObserver {
    /// Called after every successful status poll.
    fn on_status(&mut self, _batch: &Batch, _elapsed: Duration) {}

    /// Called once, the first time the batch reports an application id.
    fn on_app_started(&mut self, _app_id: &str, _history_url: Option<&str>, _app_url: Option<&str>) {
    }

    /// Called when a status poll fails but the budget is not yet spent. The
    /// observer owns the user-facing warning.
    fn on_poll_error(&mut self, _error: &SubmissionError, _consecutive: u32, _budget: u32) {}

    /// Called once with the final summary.
    fn on_complete(&mut self, _summary: &MonitorSummary) {}
}

/// What the monitor saw, produced when polling stops.
#[derive(Debug, Clone)]
pub struct MonitorSummary {
    pub batch_id: String,
    pub verdict: Verdict,
    /// Last successfully polled snapshot.
    pub last: Option<Batch>,
    pub polls: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl MonitorSummary {
    /// Elapsed time as `XmYs`.
    pub fn elapsed_display(&self) -> String {
        let secs = self.duration_ms.max(0) / 1000;
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Polls a batch at a fixed interval until it reaches a terminal state.
///
/// There is no overall deadline; polling ends only on a terminal verdict or
/// once the consecutive-failure budget is spent.
pub struct Monitor<'a, A> {
    api: &'a A,
    settings: MonitorSettings,
    history_server_url: Option<String>,
}

impl<'a, A: BatchApi> Monitor<'a, A> {
    pub fn new(api: &'a A, settings: MonitorSettings, history_server_url: Option<String>) -> Self {
        Self {
            api,
            settings,
            history_server_url,
        }
    }

    pub async fn run(&self, batch_id: &str, observer: &mut impl MonitorObserver) -> MonitorSummary {
        debug!(batch_id, "monitoring batch");
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut machine = MonitorMachine::new(self.settings.max_poll_failures);
        let mut app_announced = false;
        let mut last: Option<Batch> = None;

        loop {
            let observation = self.api.get_batch(batch_id).await;
            let elapsed = clock.elapsed();

            if let Ok(batch) = &observation {
                debug!(
                    batch_id,
                    state = batch.state.as_deref().unwrap_or(""),
                    app_state = batch.app_state().unwrap_or(""),
                    app_id = batch.app_id().unwrap_or(""),
                    elapsed_secs = elapsed.as_secs(),
                    "polled batch status"
                );
                observer.on_status(batch, elapsed);
                if !app_announced && let Some(app_id) = batch.app_id() {
                    app_announced = true;
                    let history_url = self
                        .history_server_url
                        .as_deref()
                        .and_then(|base| history_app_url(base, app_id));
                    observer.on_app_started(app_id, history_url.as_deref(), batch.app_url());
                }
            }

            let transition = machine.next(observation.as_ref());
            match &transition {
                Transition::Continue(state) => debug!(batch_id, %state, "batch in flight"),
                Transition::Retry {
                    consecutive_failures,
                    error,
                } => {
                    let http_status = observation.as_ref().err().and_then(SubmissionError::status);
                    debug!(
                        batch_id,
                        consecutive_failures,
                        budget = machine.max_failures(),
                        http_status,
                        "status poll failed: {error}"
                    );
                    if let Err(e) = &observation {
                        observer.on_poll_error(e, *consecutive_failures, machine.max_failures());
                    }
                }
                Transition::Complete(_) => {}
            }
            if let Ok(batch) = observation {
                last = Some(batch);
            }

            if let Transition::Complete(verdict) = transition {
                let completed_at = Utc::now();
                let summary = MonitorSummary {
                    batch_id: batch_id.to_string(),
                    verdict,
                    last,
                    polls: machine.polls(),
                    started_at,
                    completed_at,
                    duration_ms: (completed_at - started_at).num_milliseconds(),
                };
                observer.on_complete(&summary);
                return summary;
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kyuubi::types::OperationLog;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a scripted sequence of status responses.
    pub(crate) struct ScriptedApi {
        statuses: Mutex<VecDeque<Result<Batch, SubmissionError>>>,
        pub(crate) logs: Mutex<VecDeque<Result<OperationLog, SubmissionError>>>,
        pub(crate) log_calls: Mutex<Vec<(u64, u64)>>,
    }

    impl ScriptedApi {
        pub(crate) fn new(statuses: Vec<Result<Batch, SubmissionError>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                logs: Mutex::new(VecDeque::new()),
                log_calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn with_logs(self, logs: Vec<Result<OperationLog, SubmissionError>>) -> Self {
            *self.logs.lock().unwrap() = logs.into();
            self
        }
    }

    impl BatchApi for ScriptedApi {
        async fn get_batch(&self, _batch_id: &str) -> Result<Batch, SubmissionError> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .expect("status script exhausted")
        }

        async fn get_local_log(
            &self,
            _batch_id: &str,
            from: u64,
            size: u64,
        ) -> Result<OperationLog, SubmissionError> {
            self.log_calls.lock().unwrap().push((from, size));
            self.logs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(OperationLog::default()))
        }
    }

    pub(crate) fn status(state: &str, app_state: Option<&str>, app_id: Option<&str>) -> Batch {
        Batch {
            id: "batch-1".into(),
            state: Some(state.into()),
            app_state: app_state.map(Into::into),
            app_id: app_id.map(Into::into),
            ..Default::default()
        }
    }

    fn settings(max_poll_failures: u32) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::ZERO,
            max_poll_failures,
        }
    }

    struct Silent;

    impl MonitorObserver for Silent {}

    #[derive(Default)]
    struct Recorder {
        statuses: Vec<String>,
        apps: Vec<(String, Option<String>)>,
        errors: Vec<u32>,
        completed: Option<Verdict>,
    }

    impl MonitorObserver for Recorder {
        fn on_status(&mut self, batch: &Batch, _elapsed: Duration) {
            self.statuses.push(batch.state.clone().unwrap_or_default());
        }

        fn on_app_started(&mut self, app_id: &str, history_url: Option<&str>, _app_url: Option<&str>) {
            self.apps
                .push((app_id.to_string(), history_url.map(str::to_string)));
        }

        fn on_poll_error(&mut self, _error: &SubmissionError, consecutive: u32, _budget: u32) {
            self.errors.push(consecutive);
        }

        fn on_complete(&mut self, summary: &MonitorSummary) {
            self.completed = Some(summary.verdict.clone());
        }
    }

    fn unavailable() -> SubmissionError {
        SubmissionError::Api {
            status: 503,
            body: "unavailable".into(),
        }
    }

    #[tokio::test]
    async fn runs_until_terminal_and_announces_app_once() {
        let api = ScriptedApi::new(vec![
            Ok(status("PENDING", None, None)),
            Ok(status("RUNNING", Some("RUNNING"), Some("spark-1"))),
            Ok(status("RUNNING", Some("RUNNING"), Some("spark-1"))),
            Ok(status("FINISHED", Some("FINISHED"), Some("spark-1"))),
        ]);
        let monitor = Monitor::new(&api, settings(3), Some("http://shs:18080".into()));
        let mut recorder = Recorder::default();

        let summary = monitor.run("batch-1", &mut recorder).await;

        assert_eq!(summary.verdict, Verdict::Success);
        assert_eq!(summary.polls, 4);
        assert_eq!(
            recorder.statuses,
            vec!["PENDING", "RUNNING", "RUNNING", "FINISHED"]
        );
        assert_eq!(
            recorder.apps,
            vec![(
                "spark-1".to_string(),
                Some("http://shs:18080/history/spark-1/".to_string())
            )]
        );
        assert_eq!(recorder.completed, Some(Verdict::Success));
        assert_eq!(
            summary.last.unwrap().app_state.as_deref(),
            Some("FINISHED")
        );
    }

    #[tokio::test]
    async fn finished_batch_with_failed_app_fails() {
        let api = ScriptedApi::new(vec![Ok(status("FINISHED", Some("FAILED"), Some("spark-9")))]);
        let summary = Monitor::new(&api, settings(3), None)
            .run("batch-1", &mut Silent)
            .await;
        assert!(matches!(summary.verdict, Verdict::Failed { .. }));
        assert_eq!(summary.verdict.exit_code(), 1);
    }

    #[tokio::test]
    async fn transient_poll_errors_are_reported_and_recovered() {
        let api = ScriptedApi::new(vec![
            Err(unavailable()),
            Ok(status("RUNNING", None, None)),
            Err(unavailable()),
            Ok(status("CANCELED", None, None)),
        ]);
        let mut recorder = Recorder::default();
        let summary = Monitor::new(&api, settings(2), None)
            .run("batch-1", &mut recorder)
            .await;
        assert_eq!(summary.verdict, Verdict::Cancelled);
        assert_eq!(recorder.errors, vec![1, 1]);
    }

    #[tokio::test]
    async fn exhausted_poll_budget_is_unexpected() {
        let api = ScriptedApi::new(vec![
            Ok(status("RUNNING", None, None)),
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
        ]);
        let mut recorder = Recorder::default();
        let summary = Monitor::new(&api, settings(3), None)
            .run("batch-1", &mut recorder)
            .await;
        match &summary.verdict {
            Verdict::Unexpected { reason } => assert!(reason.contains("503")),
            other => panic!("expected unexpected verdict, got {other:?}"),
        }
        assert_eq!(summary.verdict.exit_code(), 3);
        assert_eq!(recorder.errors, vec![1, 2]);
        assert_eq!(summary.last.unwrap().state.as_deref(), Some("RUNNING"));
    }

    #[tokio::test]
    async fn no_history_server_means_no_history_link() {
        let api = ScriptedApi::new(vec![Ok(status("FINISHED", None, Some("spark-2")))]);
        let mut recorder = Recorder::default();
        Monitor::new(&api, settings(1), None)
            .run("batch-1", &mut recorder)
            .await;
        assert_eq!(recorder.apps, vec![("spark-2".to_string(), None)]);
    }

    #[test]
    fn elapsed_display_formats_minutes_and_seconds() {
        let now = Utc::now();
        let summary = MonitorSummary {
            batch_id: "b".into(),
            verdict: Verdict::Success,
            last: None,
            polls: 1,
            started_at: now,
            completed_at: now,
            duration_ms: 125_400,
        };
        assert_eq!(summary.elapsed_display(), "2m 5s");
    }
}
