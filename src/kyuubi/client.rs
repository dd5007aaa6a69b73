use std::future::Future;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::error::SubmissionError;
use super::types::{Batch, BatchRequest, OperationLog};
use crate::job::{JobSpec, ResourcePlan};

const BATCHES_PATH: &str = "/api/v1/batches";

/// Read side of the batch API, used by the monitor and the reporter.
pub trait BatchApi {
    fn get_batch(&self, batch_id: &str)
    -> impl Future<Output = Result<Batch, SubmissionError>> + Send;

    fn get_local_log(
        &self,
        batch_id: &str,
        from: u64,
        size: u64,
    ) -> impl Future<Output = Result<OperationLog, SubmissionError>> + Send;
}

/// HTTP client for a single Kyuubi server, authenticated with basic auth.
pub struct KyuubiClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl KyuubiClient {
    pub fn new(
        server: &str,
        username: &str,
        password: &str,
        insecure: bool,
    ) -> Result<Self, SubmissionError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| SubmissionError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: server.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn from_spec(spec: &JobSpec) -> Result<Self, SubmissionError> {
        Self::new(&spec.server, &spec.username, &spec.password, spec.insecure)
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}{BATCHES_PATH}{suffix}", self.base_url)
    }

    /// Creates the batch, uploading local resources when the plan has any.
    pub async fn create_batch(
        &self,
        spec: &JobSpec,
        plan: &ResourcePlan,
    ) -> Result<Batch, SubmissionError> {
        let request = BatchRequest::new(spec, plan);
        debug!(
            "batch request: {}",
            serde_json::to_string_pretty(&request).unwrap_or_default()
        );

        let builder = self
            .client
            .post(self.url(""))
            .basic_auth(&self.username, Some(&self.password));

        let response = if plan.needs_upload() {
            let form = multipart_form(&request, plan).await?;
            info!(job = %request.name, "submitting batch with resource upload");
            builder.multipart(form).send().await?
        } else {
            info!(job = %request.name, "submitting batch");
            builder.json(&request).send().await?
        };

        decode(response).await
    }

    pub async fn cancel_batch(&self, batch_id: &str) -> Result<(), SubmissionError> {
        let response = self
            .client
            .delete(self.url(&format!("/{batch_id}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubmissionError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

impl BatchApi for KyuubiClient {
    async fn get_batch(&self, batch_id: &str) -> Result<Batch, SubmissionError> {
        let response = self
            .client
            .get(self.url(&format!("/{batch_id}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        decode(response).await
    }

    async fn get_local_log(
        &self,
        batch_id: &str,
        from: u64,
        size: u64,
    ) -> Result<OperationLog, SubmissionError> {
        let response = self
            .client
            .get(self.url(&format!("/{batch_id}/localLog")))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("from", from), ("size", size)])
            .send()
            .await?;
        decode(response).await
    }
}

/// Multipart body: the batch request, the extra resources map, and one
/// binary part per local file named after its upload name. Files are
/// streamed from disk, not buffered.
async fn multipart_form(
    request: &BatchRequest,
    plan: &ResourcePlan,
) -> Result<Form, SubmissionError> {
    let mut form = Form::new()
        .part("batchRequest", json_part(request)?)
        .part("extraResourcesMap", json_part(&plan.extra_resources_map())?);

    for reference in plan.local() {
        let (Some(path), Some(name)) = (reference.local_path(), reference.upload_name.clone())
        else {
            continue;
        };
        let upload_error = |source| SubmissionError::Upload {
            path: path.clone(),
            source,
        };
        let file = tokio::fs::File::open(&path).await.map_err(upload_error)?;
        let length = file.metadata().await.map_err(upload_error)?.len();
        debug!(
            kind = %reference.kind,
            path = %path.display(),
            upload_name = %name,
            bytes = length,
            "staging local resource"
        );
        let part = Part::stream_with_length(file, length)
            .file_name(name.clone())
            .mime_str("application/octet-stream")?;
        form = form.part(name, part);
    }
    Ok(form)
}

fn json_part<T: Serialize>(value: &T) -> Result<Part, SubmissionError> {
    let body = serde_json::to_string(value)?;
    Ok(Part::text(body).mime_str("application/json")?)
}

/// Reads the body once so both the status and the raw text are available
/// for diagnostics.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, SubmissionError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(SubmissionError::Api {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| SubmissionError::Malformed {
        status: status.as_u16(),
        reason: e.to_string(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::sample_spec;
    use wiremock::matchers::{basic_auth, body_json, header_regex, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> KyuubiClient {
        KyuubiClient::new(&format!("{}/", server.uri()), "alice", "secret", false).unwrap()
    }

    fn touch(dir: &std::path::Path, rel: &str, content: &[u8]) -> String {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn create_plain_sends_json_body() {
        let server = MockServer::start().await;
        let spec = sample_spec();
        let plan = ResourcePlan::from_spec(&spec).unwrap();
        let expected = serde_json::to_value(BatchRequest::new(&spec, &plan)).unwrap();

        Mock::given(method("POST"))
            .and(path("/api/v1/batches"))
            .and(basic_auth("alice", "secret"))
            .and(body_json(&expected))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "batch-1", "state": "PENDING"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let batch = client_for(&server).create_batch(&spec, &plan).await.unwrap();
        assert_eq!(batch.id, "batch-1");
        assert_eq!(batch.state.as_deref(), Some("PENDING"));
    }

    #[tokio::test]
    async fn create_with_local_resources_uploads_multipart() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "build/a.jar", b"main-bytes");
        let b = touch(dir.path(), "lib/b.jar", b"lib-bytes");

        let mut spec = sample_spec();
        spec.resource = a;
        spec.jars = vec![b, "s3a://x/c.jar".into()];
        let plan = ResourcePlan::from_spec(&spec).unwrap();

        Mock::given(method("POST"))
            .and(path("/api/v1/batches"))
            .and(header_regex("content-type", "^multipart/form-data"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "batch-2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let batch = client_for(&server).create_batch(&spec, &plan).await.unwrap();
        assert_eq!(batch.id, "batch-2");

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).into_owned();
        assert_eq!(body.matches("filename=").count(), 2);
        assert!(body.contains(r#"name="a.jar"; filename="a.jar""#));
        assert!(body.contains(r#"name="b.jar"; filename="b.jar""#));
        assert!(!body.contains(r#"filename="c.jar""#));
        assert!(body.contains("main-bytes"));
        assert!(body.contains("lib-bytes"));
        assert!(body.contains(r#"name="extraResourcesMap""#));
        assert!(body.contains(r#"{"mainResource":"a.jar","jar":["b.jar"]}"#));
        assert!(body.contains(r#"name="batchRequest""#));
        assert!(body.contains(r#""resource":"a.jar""#));
        assert!(body.contains(r#""jars":["b.jar","s3a://x/c.jar"]"#));
    }

    #[tokio::test]
    async fn create_rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/batches"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("required uploaded file b.jar missing"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let spec = sample_spec();
        let plan = ResourcePlan::from_spec(&spec).unwrap();
        let err = client_for(&server)
            .create_batch(&spec, &plan)
            .await
            .unwrap_err();
        match err {
            SubmissionError::Api { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "required uploaded file b.jar missing");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_without_id_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/batches"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"state":"PENDING"}"#))
            .mount(&server)
            .await;

        let spec = sample_spec();
        let plan = ResourcePlan::from_spec(&spec).unwrap();
        let err = client_for(&server)
            .create_batch(&spec, &plan)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Malformed { status: 200, .. }));
    }

    #[tokio::test]
    async fn get_batch_returns_state_tuple() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/batches/batch-1"))
            .and(basic_auth("alice", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "batch-1",
                "state": "RUNNING",
                "appState": "RUNNING",
                "appId": "spark-42"
            })))
            .mount(&server)
            .await;

        let batch = client_for(&server).get_batch("batch-1").await.unwrap();
        assert_eq!(batch.state.as_deref(), Some("RUNNING"));
        assert_eq!(batch.app_state(), Some("RUNNING"));
        assert_eq!(batch.app_id(), Some("spark-42"));
    }

    #[tokio::test]
    async fn get_local_log_sends_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/batches/batch-1/localLog"))
            .and(query_param("from", "1000"))
            .and(query_param("size", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "logRowSet": ["line 1001"],
                "rowCount": 1001
            })))
            .mount(&server)
            .await;

        let page = client_for(&server)
            .get_local_log("batch-1", 1000, 1000)
            .await
            .unwrap();
        assert_eq!(page.log_row_set, vec!["line 1001"]);
        assert_eq!(page.row_count, Some(1001));
    }

    #[tokio::test]
    async fn cancel_batch_uses_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/batches/batch-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "msg": ""
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/batches/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such batch"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.cancel_batch("batch-1").await.unwrap();
        let err = client.cancel_batch("gone").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let client = KyuubiClient::new("http://127.0.0.1:1", "alice", "secret", false).unwrap();
        let err = client.get_batch("batch-1").await.unwrap_err();
        assert!(matches!(err, SubmissionError::Transport(_)));
    }
}
