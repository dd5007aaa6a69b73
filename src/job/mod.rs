pub mod resource;
pub mod spec;

pub use resource::{ResourceError, ResourcePlan, ResourceReference};
pub use spec::{
    ArtifactKind, JobSpec, MonitorSettings, history_app_url, normalize_history_server,
    normalize_queue,
};

#[cfg(test)]
pub(crate) use spec::sample_spec;
