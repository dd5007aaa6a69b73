//! Job configuration, merged from the command line, an optional YAML/TOML
//! file, the environment and, for the password only, an interactive prompt.
//!
//! Every field is resolved on its own through an ordered list of sources
//! (command line, config file, environment, prompt); the first source that
//! supplies a non-blank value wins. Validation runs on the merged result,
//! before any file is probed or any request is sent.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use console::Term;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::job::{
    ArtifactKind, JobSpec, MonitorSettings, normalize_history_server, normalize_queue,
};

/// Environment variable holding the default password.
pub const PASSWORD_ENV: &str = "KYUUBI_SUBMIT_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "missing required field(s): {}; provide them in the config file or on the command line",
        .0.join(", ")
    )]
    MissingFields(Vec<&'static str>),

    #[error("a class name is required for jar resource {resource} (use --classname)")]
    MissingClassName { resource: String },

    #[error("malformed spark property {entry:?}: expected key=value with a non-empty key")]
    MalformedProperty { entry: String },

    #[error("malformed {field} list {value:?}: entries must be non-empty and comma separated")]
    MalformedList { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse YAML config file {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse TOML config file {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to read password: {0}")]
    Prompt(#[source] io::Error),
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    CommandLine,
    ConfigFile,
    Environment,
    Prompt,
    Default,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::CommandLine => write!(f, "command line"),
            Source::ConfigFile => write!(f, "config file"),
            Source::Environment => write!(f, "environment"),
            Source::Prompt => write!(f, "prompt"),
            Source::Default => write!(f, "default"),
        }
    }
}

/// A scalar as written in a YAML/TOML file; stringified on use.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => write!(f, "{v}"),
        }
    }
}

/// A list field in the config file: a native list, or a delimited string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ListValue {
    List(Vec<Scalar>),
    Delimited(String),
}

/// The Spark properties field in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConfValue {
    Map(BTreeMap<String, Scalar>),
    Delimited(String),
}

/// Structured config file contents.
///
/// Keys may be spelled like the command-line flags (`resource`, `name`,
/// `conf`) or like the job fields (`resourcePath`, `jobName`,
/// `sparkProperties`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "resourcePath", alias = "resource_path")]
    pub resource: Option<String>,
    #[serde(alias = "className", alias = "class_name")]
    pub classname: Option<String>,
    #[serde(alias = "jobName", alias = "job_name")]
    pub name: Option<String>,
    #[serde(alias = "arguments")]
    pub args: Option<ListValue>,
    #[serde(alias = "sparkProperties", alias = "spark_properties")]
    pub conf: Option<ConfValue>,
    #[serde(alias = "pythonDependencies", alias = "py_files")]
    pub pyfiles: Option<ListValue>,
    #[serde(alias = "extraJars")]
    pub jars: Option<ListValue>,
    #[serde(alias = "extraFiles")]
    pub files: Option<ListValue>,
    #[serde(alias = "queueName")]
    pub queue: Option<String>,
    #[serde(alias = "historyServerUrl", alias = "history-server")]
    pub history_server: Option<String>,
    #[serde(alias = "showLogsOnCompletion", alias = "show-logs")]
    pub show_logs: Option<bool>,
    pub debug: Option<bool>,
    pub insecure: Option<bool>,
    #[serde(alias = "pollInterval")]
    pub poll_interval: Option<u64>,
    #[serde(alias = "maxPollFailures")]
    pub max_poll_failures: Option<u32>,
}

impl FileConfig {
    /// Loads a config file; `.toml` files are read as TOML, everything else
    /// as YAML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        if is_toml {
            toml::from_str(contents).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })
        } else {
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Values given on the command line. Lists and properties arrive as single
/// delimited strings; boolean flags only count when set.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub resource: Option<String>,
    pub classname: Option<String>,
    pub name: Option<String>,
    pub args: Option<String>,
    pub conf: Option<String>,
    pub pyfiles: Option<String>,
    pub jars: Option<String>,
    pub files: Option<String>,
    pub queue: Option<String>,
    pub history_server: Option<String>,
    pub show_logs: bool,
    pub debug: bool,
    pub insecure: bool,
    pub poll_interval: Option<u64>,
    pub max_poll_failures: Option<u32>,
}

/// Asks the operator for a password when no other source has one.
pub trait PasswordPrompt {
    fn read_password(&self, username: &str) -> io::Result<String>;
}

/// Reads the password from the controlling terminal without echo.
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn read_password(&self, username: &str) -> io::Result<String> {
        let term = Term::stderr();
        term.write_str(&format!("Password for {username}: "))?;
        term.read_secure_line()
    }
}

/// Returns the first present value and its source.
pub fn first_of<T>(candidates: impl IntoIterator<Item = (Source, Option<T>)>) -> Option<(Source, T)> {
    candidates
        .into_iter()
        .find_map(|(source, value)| value.map(|v| (source, v)))
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Like [`non_blank`] but keeps the value verbatim; secrets are never trimmed.
fn verbatim(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

/// Splits a comma-separated resource list. Blank input is an empty list;
/// an empty entry anywhere else is an error.
pub fn split_list(field: &'static str, raw: &str) -> Result<Vec<String>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                Err(ConfigError::MalformedList {
                    field,
                    value: raw.to_string(),
                })
            } else {
                Ok(entry.to_string())
            }
        })
        .collect()
}

/// Splits whitespace-separated program arguments.
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Parses `key=value,key=value`. Values may themselves contain `=`.
pub fn parse_properties(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut props = BTreeMap::new();
    for entry in split_list("conf", raw)? {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedProperty {
                entry: entry.clone(),
            })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::MalformedProperty { entry });
        }
        props.insert(key.to_string(), value.trim().to_string());
    }
    Ok(props)
}

fn file_list(
    field: &'static str,
    value: &Option<ListValue>,
    whitespace: bool,
) -> Result<Option<Vec<String>>, ConfigError> {
    match value {
        None => Ok(None),
        Some(ListValue::List(items)) => Ok(Some(items.iter().map(Scalar::to_string).collect())),
        Some(ListValue::Delimited(raw)) if whitespace => Ok(Some(split_args(raw))),
        Some(ListValue::Delimited(raw)) => split_list(field, raw).map(Some),
    }
}

fn file_properties(value: &Option<ConfValue>) -> Result<BTreeMap<String, String>, ConfigError> {
    match value {
        None => Ok(BTreeMap::new()),
        Some(ConfValue::Delimited(raw)) => parse_properties(raw),
        Some(ConfValue::Map(map)) => map
            .iter()
            .map(|(key, value)| {
                let key = key.trim();
                if key.is_empty() {
                    Err(ConfigError::MalformedProperty {
                        entry: format!("={value}"),
                    })
                } else {
                    Ok((key.to_string(), value.to_string()))
                }
            })
            .collect(),
    }
}

/// Records the winning source of each field for the debug log.
#[derive(Default)]
struct Provenance(Vec<(&'static str, Source)>);

impl Provenance {
    fn pick<T>(
        &mut self,
        field: &'static str,
        candidates: impl IntoIterator<Item = (Source, Option<T>)>,
    ) -> Option<T> {
        let (source, value) = first_of(candidates)?;
        self.0.push((field, source));
        Some(value)
    }
}

/// Merges the fragments into a validated [`JobSpec`].
///
/// `env_password` is the value of [`PASSWORD_ENV`], if set. `prompt` is only
/// consulted when no other source supplies a password, and only after the
/// rest of the configuration validated.
pub fn resolve(
    cli: &CliOverrides,
    file: Option<&FileConfig>,
    env_password: Option<String>,
    prompt: &dyn PasswordPrompt,
) -> Result<JobSpec, ConfigError> {
    let empty = FileConfig::default();
    let file = file.unwrap_or(&empty);
    let mut provenance = Provenance::default();
    use Source::{CommandLine, ConfigFile, Environment};

    let mut scalar = |field: &'static str, cli: &Option<String>, file: &Option<String>| {
        provenance.pick(field, [(CommandLine, non_blank(cli)), (ConfigFile, non_blank(file))])
    };
    let server = scalar("server", &cli.server, &file.server);
    let username = scalar("username", &cli.username, &file.username);
    let resource = scalar("resource", &cli.resource, &file.resource);
    let class_name = scalar("classname", &cli.classname, &file.classname);
    let job_name = scalar("name", &cli.name, &file.name);
    let queue = scalar("queue", &cli.queue, &file.queue);
    let history_server = scalar("history_server", &cli.history_server, &file.history_server);

    let missing: Vec<&'static str> = [
        ("server", &server),
        ("username", &username),
        ("resource", &resource),
        ("name", &job_name),
    ]
    .into_iter()
    .filter(|(_, value)| value.is_none())
    .map(|(field, _)| field)
    .collect();
    let (Some(server), Some(username), Some(resource), Some(job_name)) =
        (server, username, resource, job_name)
    else {
        return Err(ConfigError::MissingFields(missing));
    };

    if class_name.is_none() && ArtifactKind::from_path(&resource).requires_class_name() {
        return Err(ConfigError::MissingClassName { resource });
    }

    let arguments = provenance
        .pick(
            "args",
            [
                (CommandLine, cli.args.as_deref().map(split_args)),
                (ConfigFile, file_list("args", &file.args, true)?),
            ],
        )
        .unwrap_or_default();
    let mut list = |field: &'static str, cli: &Option<String>, file: &Option<ListValue>| {
        let from_cli = cli.as_deref().map(|raw| split_list(field, raw)).transpose()?;
        let from_file = file_list(field, file, false)?;
        Ok::<_, ConfigError>(
            provenance
                .pick(field, [(CommandLine, from_cli), (ConfigFile, from_file)])
                .unwrap_or_default(),
        )
    };
    let jars = list("jars", &cli.jars, &file.jars)?;
    let py_files = list("pyfiles", &cli.pyfiles, &file.pyfiles)?;
    let files = list("files", &cli.files, &file.files)?;

    // File properties first, command-line entries override them by key.
    let mut spark_properties = file_properties(&file.conf)?;
    if let Some(raw) = &cli.conf {
        spark_properties.extend(parse_properties(raw)?);
    }

    let mut flag = |field: &'static str, cli: bool, file: Option<bool>| {
        provenance
            .pick(field, [(CommandLine, cli.then_some(true)), (ConfigFile, file)])
            .unwrap_or(false)
    };
    let show_logs = flag("show_logs", cli.show_logs, file.show_logs);
    let debug = flag("debug", cli.debug, file.debug);
    let insecure = flag("insecure", cli.insecure, file.insecure);

    let defaults = MonitorSettings::default();
    let poll_interval = provenance
        .pick(
            "poll_interval",
            [
                (CommandLine, cli.poll_interval),
                (ConfigFile, file.poll_interval),
                (Source::Default, Some(defaults.poll_interval.as_secs())),
            ],
        )
        .unwrap_or(defaults.poll_interval.as_secs());
    if poll_interval == 0 {
        return Err(ConfigError::NotPositive {
            field: "poll_interval",
        });
    }
    let max_poll_failures = provenance
        .pick(
            "max_poll_failures",
            [
                (CommandLine, cli.max_poll_failures),
                (ConfigFile, file.max_poll_failures),
                (Source::Default, Some(defaults.max_poll_failures)),
            ],
        )
        .unwrap_or(defaults.max_poll_failures);
    if max_poll_failures == 0 {
        return Err(ConfigError::NotPositive {
            field: "max_poll_failures",
        });
    }

    let password = match provenance.pick(
        "password",
        [
            (CommandLine, verbatim(cli.password.as_ref())),
            (ConfigFile, verbatim(file.password.as_ref())),
            (Environment, verbatim(env_password.as_ref())),
        ],
    ) {
        Some(password) => password,
        None => {
            provenance.0.push(("password", Source::Prompt));
            prompt.read_password(&username).map_err(ConfigError::Prompt)?
        }
    };

    for (field, source) in &provenance.0 {
        debug!(field, %source, "resolved config field");
    }

    Ok(JobSpec {
        server,
        username,
        password,
        resource,
        class_name,
        job_name,
        arguments,
        spark_properties,
        py_files,
        jars,
        files,
        queue: queue.as_deref().map(normalize_queue),
        history_server_url: history_server.as_deref().map(normalize_history_server),
        show_logs,
        debug,
        insecure,
        monitor: MonitorSettings {
            poll_interval: Duration::from_secs(poll_interval),
            max_poll_failures,
        },
    })
}
