//! Request and response bodies of the Kyuubi `/api/v1/batches` endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::{JobSpec, ResourcePlan, ResourceReference};

/// Batch type sent for every submission.
pub const BATCH_TYPE_SPARK: &str = "SPARK";

/// Body of `POST /api/v1/batches`, either as the whole JSON body or as the
/// `batchRequest` part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub batch_type: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub name: String,
    pub args: Vec<String>,
    pub conf: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jars: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub py_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl BatchRequest {
    /// Builds the request for a classified job. Local references are named by
    /// their upload name, remote ones by their original URI.
    pub fn new(spec: &JobSpec, plan: &ResourcePlan) -> Self {
        fn paths(refs: &[ResourceReference]) -> Vec<String> {
            refs.iter().map(|r| r.submitted_path().to_string()).collect()
        }

        Self {
            batch_type: BATCH_TYPE_SPARK.to_string(),
            resource: plan.main.submitted_path().to_string(),
            class_name: spec.effective_class_name(),
            name: spec.job_name.clone(),
            args: spec.arguments.clone(),
            conf: spec.submitted_properties(),
            jars: paths(&plan.jars),
            py_files: paths(&plan.py_files),
            files: paths(&plan.files),
        }
    }
}

/// A batch as reported by the server.
///
/// Only `id` is guaranteed; the remaining fields appear as the batch and
/// its Spark application progress.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    #[serde(default, alias = "batchState")]
    pub state: Option<String>,
    #[serde(default)]
    pub app_state: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_url: Option<String>,
    #[serde(default)]
    pub app_diagnostic: Option<String>,
}

impl Batch {
    /// `appId` with empty strings treated as absent.
    pub fn app_id(&self) -> Option<&str> {
        non_empty(self.app_id.as_deref())
    }

    pub fn app_state(&self) -> Option<&str> {
        non_empty(self.app_state.as_deref())
    }

    pub fn app_url(&self) -> Option<&str> {
        non_empty(self.app_url.as_deref())
    }

    pub fn app_diagnostic(&self) -> Option<&str> {
        non_empty(self.app_diagnostic.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// One page of `GET /api/v1/batches/{id}/localLog`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLog {
    #[serde(default)]
    pub log_row_set: Vec<String>,
    /// Total number of rows available, when the server reports it.
    #[serde(default, alias = "total")]
    pub row_count: Option<u64>,
}
