//! Turns a monitor summary into an exit status and, on request, dumps the
//! batch log.

use std::io::Write;

use tracing::{info, warn};

use crate::kyuubi::{BatchApi, SubmissionError};
use crate::monitor::MonitorSummary;

/// Rows requested per `localLog` call.
pub const LOG_PAGE_SIZE: u64 = 1000;

const BANNER: &str = "==================== Batch Log ====================";
const BANNER_END: &str = "==================== End of Log ===================";

/// Fetches every log row of a batch, page by page.
///
/// Stops on an empty or short page, or once the server-reported row count
/// has been read.
pub async fn collect_logs<A: BatchApi>(
    api: &A,
    batch_id: &str,
) -> Result<Vec<String>, SubmissionError> {
    let mut lines = Vec::new();
    let mut from = 0u64;
    loop {
        let page = api.get_local_log(batch_id, from, LOG_PAGE_SIZE).await?;
        let fetched = page.log_row_set.len() as u64;
        from += fetched;
        lines.extend(page.log_row_set);

        let reached_total = page
            .row_count
            .is_some_and(|total| total > fetched && from >= total);
        if fetched < LOG_PAGE_SIZE || reached_total {
            break;
        }
    }
    Ok(lines)
}

/// Reports the outcome and returns the process exit status.
///
/// Log retrieval problems are logged and never change the status.
pub async fn report<A: BatchApi>(
    api: &A,
    summary: &MonitorSummary,
    show_logs: bool,
    out: &mut impl Write,
) -> i32 {
    let code = summary.verdict.exit_code();
    info!(
        batch_id = %summary.batch_id,
        verdict = %summary.verdict,
        polls = summary.polls,
        duration_ms = summary.duration_ms,
        exit_code = code,
        "batch finished"
    );

    if !show_logs {
        info!(
            "Run with --show-logs to print the log of batch {}",
            summary.batch_id
        );
        return code;
    }

    match collect_logs(api, &summary.batch_id).await {
        Ok(lines) => {
            if let Err(e) = write_log(out, &lines) {
                warn!("failed to print batch log: {e}");
            }
        }
        Err(e) => warn!(batch_id = %summary.batch_id, "failed to retrieve batch log: {e}"),
    }
    code
}

fn write_log(out: &mut impl Write, lines: &[String]) -> std::io::Result<()> {
    writeln!(out, "{BANNER}")?;
    for line in lines {
        writeln!(out, "{line}")?;
    }
    writeln!(out, "{BANNER_END}")?;
    out.flush()
}
