//! Local/remote classification of the files a job references.
//!
//! A reference is remote when its path starts with one of a closed set of
//! URI schemes the cluster can read directly; everything else is a local
//! file that has to be uploaded with the submission. Local files are probed
//! here, before any network call, so a typo in a path fails fast.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::spec::JobSpec;

/// URI scheme prefixes the cluster resolves on its own.
pub const REMOTE_SCHEMES: &[&str] = &[
    "hdfs://", "viewfs://", "s3://", "s3a://", "s3n://", "gs://", "abfs://", "abfss://", "wasb://",
    "wasbs://", "oss://", "cos://", "cosn://", "http://", "https://", "ftp://", "local://",
];

const FILE_SCHEME: &str = "file://";

/// Multipart field names taken by the request itself.
pub const RESERVED_PART_NAMES: [&str; 2] = ["batchRequest", "extraResourcesMap"];

/// Role a resource plays in the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    MainResource,
    Jar,
    PyFile,
    File,
}

impl ResourceKind {
    /// Key used for this role in the extra resources map.
    pub fn map_key(self) -> &'static str {
        match self {
            ResourceKind::MainResource => "mainResource",
            ResourceKind::Jar => "jar",
            ResourceKind::PyFile => "pyfile",
            ResourceKind::File => "file",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::MainResource => write!(f, "main resource"),
            ResourceKind::Jar => write!(f, "jar"),
            ResourceKind::PyFile => write!(f, "pyfile"),
            ResourceKind::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Local,
    Remote,
}

/// One classified file reference.
///
/// `upload_name` is `Some` exactly when the reference is local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub original_path: String,
    pub kind: ResourceKind,
    pub locality: Locality,
    pub upload_name: Option<String>,
}

impl ResourceReference {
    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }

    /// Path the server should see: the upload name for local files, the
    /// original URI otherwise.
    pub fn submitted_path(&self) -> &str {
        self.upload_name.as_deref().unwrap_or(&self.original_path)
    }

    /// Filesystem location of a local reference.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.is_local()
            .then(|| PathBuf::from(strip_file_scheme(&self.original_path)))
    }
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{kind} {path} does not exist")]
    NotFound { kind: ResourceKind, path: String },

    #[error("{kind} {path} is not a regular file")]
    NotAFile { kind: ResourceKind, path: String },

    #[error("{kind} {path} is not readable: {source}")]
    Unreadable {
        kind: ResourceKind,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} {path} has no file name to upload under")]
    NoFileName { kind: ResourceKind, path: String },

    #[error("{kind} {path} cannot be uploaded under the reserved name {name}")]
    ReservedUploadName {
        kind: ResourceKind,
        path: String,
        name: String,
    },

    #[error("upload name {name} is used by both {first} and {second}")]
    UploadNameCollision {
        name: String,
        first: String,
        second: String,
    },
}

/// Scheme-only locality test; never touches the filesystem.
pub fn locality_of(path: &str) -> Locality {
    let lower = path.trim_start().to_ascii_lowercase();
    if REMOTE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
        Locality::Remote
    } else {
        Locality::Local
    }
}

fn strip_file_scheme(path: &str) -> &str {
    match path.get(..FILE_SCHEME.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(FILE_SCHEME) => &path[FILE_SCHEME.len()..],
        _ => path,
    }
}

/// Classifies a single reference and, for local ones, checks the file can
/// be opened.
pub fn classify_one(kind: ResourceKind, path: &str) -> Result<ResourceReference, ResourceError> {
    let locality = locality_of(path);
    let upload_name = match locality {
        Locality::Remote => None,
        Locality::Local => {
            let fs_path = Path::new(strip_file_scheme(path));
            probe_local(kind, path, fs_path)?;
            let name = fs_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| ResourceError::NoFileName {
                    kind,
                    path: path.to_string(),
                })?;
            if RESERVED_PART_NAMES.contains(&name) {
                return Err(ResourceError::ReservedUploadName {
                    kind,
                    path: path.to_string(),
                    name: name.to_string(),
                });
            }
            Some(name.to_string())
        }
    };
    debug!(%kind, path, ?locality, "classified resource");
    Ok(ResourceReference {
        original_path: path.to_string(),
        kind,
        locality,
        upload_name,
    })
}

fn probe_local(kind: ResourceKind, original: &str, fs_path: &Path) -> Result<(), ResourceError> {
    let metadata = std::fs::metadata(fs_path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ResourceError::NotFound {
            kind,
            path: original.to_string(),
        },
        _ => ResourceError::Unreadable {
            kind,
            path: original.to_string(),
            source,
        },
    })?;
    if !metadata.is_file() {
        return Err(ResourceError::NotAFile {
            kind,
            path: original.to_string(),
        });
    }
    File::open(fs_path).map_err(|source| ResourceError::Unreadable {
        kind,
        path: original.to_string(),
        source,
    })?;
    Ok(())
}

/// Classifies a sequence of references and rejects upload-name collisions.
///
/// All local references share one multipart namespace, so two different
/// files with the same basename collide regardless of their kind. The same
/// file listed again is dropped; its first role wins.
pub fn classify<'a>(
    entries: impl IntoIterator<Item = (ResourceKind, &'a str)>,
) -> Result<Vec<ResourceReference>, ResourceError> {
    let mut refs = Vec::new();
    let mut seen: HashMap<String, (String, Option<PathBuf>)> = HashMap::new();
    for (kind, path) in entries {
        let reference = classify_one(kind, path)?;
        if let Some(name) = &reference.upload_name {
            let identity = reference
                .local_path()
                .and_then(|p| std::fs::canonicalize(p).ok());
            if let Some((first, first_identity)) = seen.get(name) {
                if first == path || (identity.is_some() && *first_identity == identity) {
                    debug!(%kind, path, "dropping repeated reference to {first}");
                    continue;
                }
                return Err(ResourceError::UploadNameCollision {
                    name: name.clone(),
                    first: first.clone(),
                    second: path.to_string(),
                });
            }
            seen.insert(name.clone(), (path.to_string(), identity));
        }
        refs.push(reference);
    }
    Ok(refs)
}

/// Classified view of every file a [`JobSpec`] references.
#[derive(Debug, Clone)]
pub struct ResourcePlan {
    pub main: ResourceReference,
    pub jars: Vec<ResourceReference>,
    pub py_files: Vec<ResourceReference>,
    pub files: Vec<ResourceReference>,
}

/// Tells the server which uploaded part fills which role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraResourcesMap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_resource: Option<String>,
    #[serde(flatten)]
    pub roles: BTreeMap<&'static str, Vec<String>>,
}

impl ResourcePlan {
    pub fn from_spec(spec: &JobSpec) -> Result<Self, ResourceError> {
        let entries = std::iter::once((ResourceKind::MainResource, spec.resource.as_str()))
            .chain(spec.jars.iter().map(|p| (ResourceKind::Jar, p.as_str())))
            .chain(spec.py_files.iter().map(|p| (ResourceKind::PyFile, p.as_str())))
            .chain(spec.files.iter().map(|p| (ResourceKind::File, p.as_str())));

        // The main resource is always classified first.
        let mut refs = classify(entries)?.into_iter();
        let Some(main) = refs.next() else {
            unreachable!("main resource is always present");
        };
        let mut plan = ResourcePlan {
            main,
            jars: Vec::new(),
            py_files: Vec::new(),
            files: Vec::new(),
        };
        for reference in refs {
            match reference.kind {
                ResourceKind::Jar => plan.jars.push(reference),
                ResourceKind::PyFile => plan.py_files.push(reference),
                ResourceKind::File => plan.files.push(reference),
                ResourceKind::MainResource => unreachable!("only one main resource"),
            }
        }
        Ok(plan)
    }

    pub fn all(&self) -> impl Iterator<Item = &ResourceReference> {
        std::iter::once(&self.main)
            .chain(&self.jars)
            .chain(&self.py_files)
            .chain(&self.files)
    }

    pub fn local(&self) -> impl Iterator<Item = &ResourceReference> {
        self.all().filter(|r| r.is_local())
    }

    /// Whether the submission has to go out as a multipart upload.
    pub fn needs_upload(&self) -> bool {
        self.local().next().is_some()
    }

    pub fn extra_resources_map(&self) -> ExtraResourcesMap {
        let mut map = ExtraResourcesMap {
            main_resource: self.main.upload_name.clone(),
            roles: BTreeMap::new(),
        };
        for reference in self.local().filter(|r| r.kind != ResourceKind::MainResource) {
            if let Some(name) = &reference.upload_name {
                map.roles
                    .entry(reference.kind.map_key())
                    .or_default()
                    .push(name.clone());
            }
        }
        map
    }
}
