mod cli;
mod config;
mod error;
mod job;
mod kyuubi;
mod monitor;
mod pipeline;
mod report;
mod ui;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::{FileConfig, PASSWORD_ENV, TerminalPrompt};
use error::{EXIT_FAILURE, SubmitError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            err.downcast_ref::<SubmitError>()
                .map_or(EXIT_FAILURE, SubmitError::exit_code)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let file = cli.config_file.as_deref().map(FileConfig::load).transpose();
    let debug = cli.debug || matches!(&file, Ok(Some(f)) if f.debug == Some(true));
    init_tracing(debug);

    let file = file.map_err(SubmitError::from)?;
    if let Some(path) = &cli.config_file {
        debug!(path = %path.display(), "loaded config file");
    }

    let spec = config::resolve(
        &cli.overrides(),
        file.as_ref(),
        std::env::var(PASSWORD_ENV).ok(),
        &TerminalPrompt,
    )
    .map_err(SubmitError::from)?;

    let code = pipeline::run(&spec, &mut std::io::stdout()).await?;
    Ok(code)
}

/// `RUST_LOG` wins over the `--debug`-derived default.
fn init_tracing(debug: bool) {
    let default = if debug {
        "kyuubi_submit=debug,info"
    } else {
        "kyuubi_submit=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();
}
