use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Entry point used by Spark to launch Python applications.
pub const PYTHON_RUNNER_CLASS: &str = "org.apache.spark.deploy.PythonRunner";

/// Port appended to history-server URLs that do not name one.
pub const DEFAULT_HISTORY_SERVER_PORT: u16 = 18080;

/// Scheduler namespace prefixed to bare queue names.
pub const QUEUE_ROOT: &str = "root.default";

/// Artifact type of the main resource, inferred from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Compiled JVM artifact; an explicit entry class is mandatory.
    Jar,
    /// Python script or archive; runs through [`PYTHON_RUNNER_CLASS`].
    Python,
    /// Anything else; the class name is forwarded only when given.
    Other,
}

impl ArtifactKind {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("jar") => ArtifactKind::Jar,
            Some("py") => ArtifactKind::Python,
            _ => ArtifactKind::Other,
        }
    }

    pub fn requires_class_name(self) -> bool {
        matches!(self, ArtifactKind::Jar)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Jar => write!(f, "jar"),
            ArtifactKind::Python => write!(f, "python"),
            ArtifactKind::Other => write!(f, "other"),
        }
    }
}

/// Polling cadence and failure budget for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Consecutive failed status polls tolerated before giving up.
    pub max_poll_failures: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_poll_failures: 5,
        }
    }
}

/// Fully resolved description of one batch submission.
///
/// Built once by [`resolve`](crate::config::resolve) and never mutated
/// afterwards.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub server: String,
    pub username: String,
    pub password: String,
    pub resource: String,
    pub class_name: Option<String>,
    pub job_name: String,
    pub arguments: Vec<String>,
    pub spark_properties: BTreeMap<String, String>,
    pub py_files: Vec<String>,
    pub jars: Vec<String>,
    pub files: Vec<String>,
    /// Fully qualified queue path, already normalised.
    pub queue: Option<String>,
    /// Canonical history-server base URL, already normalised.
    pub history_server_url: Option<String>,
    pub show_logs: bool,
    pub debug: bool,
    pub insecure: bool,
    pub monitor: MonitorSettings,
}

impl JobSpec {
    pub fn artifact_kind(&self) -> ArtifactKind {
        ArtifactKind::from_path(&self.resource)
    }

    /// Class name sent to the server: the configured one, or the Python
    /// runner for Python resources.
    pub fn effective_class_name(&self) -> Option<String> {
        match (&self.class_name, self.artifact_kind()) {
            (Some(name), _) => Some(name.clone()),
            (None, ArtifactKind::Python) => Some(PYTHON_RUNNER_CLASS.to_string()),
            (None, _) => None,
        }
    }

    /// Spark properties as submitted: user entries, forced cluster deploy
    /// mode and the scheduler queue labels.
    pub fn submitted_properties(&self) -> BTreeMap<String, String> {
        let mut conf = self.spark_properties.clone();
        conf.insert("spark.submit.deployMode".into(), "cluster".into());
        if let Some(queue) = &self.queue {
            for label in QUEUE_LABELS {
                conf.insert(label.to_string(), queue.clone());
            }
        }
        conf
    }
}

/// `{base}/history/{app_id}/` for a normalised history-server base.
pub fn history_app_url(base: &str, app_id: &str) -> Option<String> {
    if app_id.is_empty() {
        return None;
    }
    Some(format!("{base}/history/{app_id}/"))
}

/// Pod labels the scheduler reads the queue from.
const QUEUE_LABELS: [&str; 2] = [
    "spark.kubernetes.driver.label.queue",
    "spark.kubernetes.executor.label.queue",
];

/// Expands a bare queue name into `root.default.<name>`.
///
/// Names that already contain a `.` are taken as full paths.
pub fn normalize_queue(name: &str) -> String {
    let name = name.trim();
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{QUEUE_ROOT}.{name}")
    }
}

/// Canonicalises a history-server host or URL.
///
/// Adds `http://` when no scheme is present and the default port when the
/// authority has none. Idempotent.
pub fn normalize_history_server(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let (scheme, rest) = with_scheme
        .split_once("://")
        .unwrap_or(("http", with_scheme.as_str()));
    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };

    if authority_has_port(authority) {
        with_scheme
    } else {
        format!("{scheme}://{authority}:{DEFAULT_HISTORY_SERVER_PORT}{path}")
    }
}

fn authority_has_port(authority: &str) -> bool {
    // Skip userinfo and a bracketed IPv6 host before looking for `:port`.
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let after_host = match host_port.rfind(']') {
        Some(idx) => &host_port[idx + 1..],
        None => host_port,
    };
    match after_host.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
pub(crate) fn sample_spec() -> JobSpec {
    JobSpec {
        server: "http://kyuubi:10099".into(),
        username: "alice".into(),
        password: "secret".into(),
        resource: "s3a://bucket/app.jar".into(),
        class_name: Some("com.example.Main".into()),
        job_name: "nightly".into(),
        arguments: vec!["--date".into(), "2024-01-01".into()],
        spark_properties: BTreeMap::new(),
        py_files: Vec::new(),
        jars: Vec::new(),
        files: Vec::new(),
        queue: None,
        history_server_url: None,
        show_logs: false,
        debug: false,
        insecure: false,
        monitor: MonitorSettings {
            poll_interval: Duration::ZERO,
            max_poll_failures: 3,
        },
    }
}
