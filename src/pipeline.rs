//! One submission run: classify, submit, monitor, report.

use std::io::Write;

use tokio::signal;
use tracing::{error, info, warn};

use crate::error::SubmitError;
use crate::job::{JobSpec, ResourcePlan};
use crate::kyuubi::KyuubiClient;
use crate::monitor::{Monitor, MonitorSummary, Verdict};
use crate::report;
use crate::ui::StatusDisplay;

enum Outcome {
    Finished(MonitorSummary),
    Interrupted,
}

/// Runs the job described by `spec` and returns the process exit status.
///
/// The log dump, when requested, is written to `out`.
pub async fn run(spec: &JobSpec, out: &mut impl Write) -> Result<i32, SubmitError> {
    let plan = ResourcePlan::from_spec(spec)?;
    info!(
        resource = %spec.resource,
        kind = %spec.artifact_kind(),
        local_files = plan.local().count(),
        "classified resources"
    );

    let client = KyuubiClient::from_spec(spec)?;
    let batch = client.create_batch(spec, &plan).await?;
    info!(batch_id = %batch.id, "Batch submitted. ID: {}", batch.id);

    let mut display = StatusDisplay::start(&batch.id, !spec.debug);
    let monitor = Monitor::new(&client, spec.monitor, spec.history_server_url.clone());
    let outcome = tokio::select! {
        summary = monitor.run(&batch.id, &mut display) => Outcome::Finished(summary),
        _ = signal::ctrl_c() => Outcome::Interrupted,
    };

    let summary = match outcome {
        Outcome::Finished(summary) => summary,
        Outcome::Interrupted => {
            display.clear();
            return Ok(cancel_interrupted(&client, &batch.id).await.exit_code());
        }
    };

    display.finish(&summary);
    Ok(report::report(&client, &summary, spec.show_logs, out).await)
}

/// Cancels a batch after an interrupt. Only a confirmed cancel counts as
/// `Cancelled`; otherwise the remote batch may still be running.
async fn cancel_interrupted(client: &KyuubiClient, batch_id: &str) -> Verdict {
    warn!(batch_id, "interrupted, cancelling batch");
    match client.cancel_batch(batch_id).await {
        Ok(()) => {
            info!(batch_id, "batch cancelled");
            Verdict::Cancelled
        }
        Err(e) => {
            error!(batch_id, "failed to cancel batch, it may still be running: {e}");
            Verdict::Unexpected {
                reason: format!("cancel of batch {batch_id} failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::sample_spec;
    use wiremock::matchers::{header_regex, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_status(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/v1/batches/batch-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn uploads_local_resources_and_reports_failed_app() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jar");
        let b = dir.path().join("b.jar");
        std::fs::write(&a, b"main").unwrap();
        std::fs::write(&b, b"lib").unwrap();

        let mut spec = sample_spec();
        spec.server = server.uri();
        spec.resource = a.to_string_lossy().into_owned();
        spec.jars = vec![b.to_string_lossy().into_owned(), "s3a://x/c.jar".into()];
        spec.debug = true;

        Mock::given(method("POST"))
            .and(path("/api/v1/batches"))
            .and(header_regex("content-type", "^multipart/form-data"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "batch-7", "state": "PENDING"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_status(
            &server,
            serde_json::json!({
                "id": "batch-7",
                "state": "FINISHED",
                "appState": "FAILED",
                "appId": "spark-7",
                "appDiagnostic": "OutOfMemoryError"
            }),
        )
        .await;

        let mut out = Vec::new();
        let code = run(&spec, &mut out).await.unwrap();
        assert_eq!(code, 1);
        assert!(out.is_empty());

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).into_owned();
        assert_eq!(body.matches("filename=").count(), 2);
        assert!(body.contains(r#"{"mainResource":"a.jar","jar":["b.jar"]}"#));
    }

    #[tokio::test]
    async fn successful_run_dumps_logs_when_asked() {
        let server = MockServer::start().await;
        let mut spec = sample_spec();
        spec.server = server.uri();
        spec.show_logs = true;
        spec.debug = true;

        Mock::given(method("POST"))
            .and(path("/api/v1/batches"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "batch-7"})),
            )
            .mount(&server)
            .await;
        mount_status(
            &server,
            serde_json::json!({"id": "batch-7", "state": "FINISHED", "appState": "SUCCEEDED"}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/batches/batch-7/localLog"))
            .and(query_param("from", "0"))
            .and(query_param("size", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"logRowSet": ["starting", "done"], "rowCount": 2}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut out = Vec::new();
        let code = run(&spec, &mut out).await.unwrap();
        assert_eq!(code, 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("starting\ndone\n"));
    }

    #[tokio::test]
    async fn interrupt_with_confirmed_cancel_exits_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/batches/batch-7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let client = KyuubiClient::new(&server.uri(), "alice", "secret", false).unwrap();

        let verdict = cancel_interrupted(&client, "batch-7").await;
        assert_eq!(verdict, Verdict::Cancelled);
        assert_eq!(verdict.exit_code(), 2);
    }

    #[tokio::test]
    async fn interrupt_with_failed_cancel_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/batches/batch-7"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such batch"))
            .expect(1)
            .mount(&server)
            .await;
        let client = KyuubiClient::new(&server.uri(), "alice", "secret", false).unwrap();

        let verdict = cancel_interrupted(&client, "batch-7").await;
        match &verdict {
            Verdict::Unexpected { reason } => assert!(reason.contains("404")),
            other => panic!("expected unexpected verdict, got {other:?}"),
        }
        assert_eq!(verdict.exit_code(), 3);
    }

    #[tokio::test]
    async fn missing_local_resource_fails_before_any_request() {
        let server = MockServer::start().await;
        let mut spec = sample_spec();
        spec.server = server.uri();
        spec.resource = "/definitely/not/here/app.jar".into();

        let err = run(&spec, &mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Resource(_)));
        assert_eq!(err.exit_code(), 1);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_submission_is_a_submission_error() {
        let server = MockServer::start().await;
        let mut spec = sample_spec();
        spec.server = server.uri();
        Mock::given(method("POST"))
            .and(path("/api/v1/batches"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = run(&spec, &mut Vec::new()).await.unwrap_err();
        match err {
            SubmitError::Submission(e) => assert_eq!(e.status(), Some(401)),
            other => panic!("expected submission error, got {other:?}"),
        }
    }
}
