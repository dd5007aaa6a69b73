//! Command-line interface built on clap.
//!
//! Every job field can also come from `--config-file`; values given here win
//! field by field.

use std::path::PathBuf;

use clap::Parser;

use crate::config::CliOverrides;

/// Submit a Spark batch job to Apache Kyuubi and monitor it to completion.
///
/// Exit status: 0 success, 1 failure, 2 cancelled, 3 unexpected state.
#[derive(Debug, Parser)]
#[command(name = "kyuubi-submit", version, about)]
pub struct Cli {
    /// YAML or TOML configuration file.
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Kyuubi server URL, e.g. https://kyuubi.example.com:10099.
    #[arg(long)]
    pub server: Option<String>,

    /// Spark History Server host or URL (e.g. spark-history.example.com).
    #[arg(long)]
    pub history_server: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    /// Password; falls back to KYUUBI_SUBMIT_PASSWORD, then a prompt.
    #[arg(long)]
    pub password: Option<String>,

    /// Main JAR or Python file, local path or remote URI.
    #[arg(long)]
    pub resource: Option<String>,

    /// Main class; required for JAR resources.
    #[arg(long)]
    pub classname: Option<String>,

    /// Job name.
    #[arg(long)]
    pub name: Option<String>,

    /// Queue to submit into; bare names are placed under root.default.
    #[arg(long)]
    pub queue: Option<String>,

    /// Space-separated application arguments.
    #[arg(long, allow_hyphen_values = true)]
    pub args: Option<String>,

    /// Comma-separated Spark properties, key=value.
    #[arg(long)]
    pub conf: Option<String>,

    /// Comma-separated Python dependencies.
    #[arg(long)]
    pub pyfiles: Option<String>,

    /// Comma-separated extra JARs.
    #[arg(long)]
    pub jars: Option<String>,

    /// Comma-separated extra files.
    #[arg(long)]
    pub files: Option<String>,

    /// Print the job log after completion.
    #[arg(long, default_value_t = false)]
    pub show_logs: bool,

    /// Enable debug logging.
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Skip TLS certificate verification.
    #[arg(long, default_value_t = false)]
    pub insecure: bool,

    /// Seconds between status polls.
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Consecutive failed status polls before giving up.
    #[arg(long, value_name = "N")]
    pub max_poll_failures: Option<u32>,
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            server: self.server.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            resource: self.resource.clone(),
            classname: self.classname.clone(),
            name: self.name.clone(),
            args: self.args.clone(),
            conf: self.conf.clone(),
            pyfiles: self.pyfiles.clone(),
            jars: self.jars.clone(),
            files: self.files.clone(),
            queue: self.queue.clone(),
            history_server: self.history_server.clone(),
            show_logs: self.show_logs,
            debug: self.debug,
            insecure: self.insecure,
            poll_interval: self.poll_interval,
            max_poll_failures: self.max_poll_failures,
        }
    }
}
