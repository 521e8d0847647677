use std::time::Duration;

use anyhow::Result;
use clap::Args;
use lochness_core::time;
use lochness_scheduler::SchedulerSettings;
use serde_json::json;

use super::util::{print_json, GlobalArgs};

#[derive(Args)]
pub struct ReapArgs {
    /// Force running jobs older than this into error (defaults to scheduler.stuck_after_secs)
    #[arg(long)]
    older_than_secs: Option<u64>,
}

pub fn run(global: &GlobalArgs, args: ReapArgs) -> Result<()> {
    let (config, kernel) = global.open_kernel()?;
    let timeout = args
        .older_than_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| SchedulerSettings::from_config(&config).stuck_after);
    let cutoff = time::now() - chrono::Duration::from_std(timeout)?;
    let reaped = kernel.reap_stuck(cutoff, timeout)?;
    tracing::info!(count = reaped.len(), "reaped stuck jobs");
    let ids: Vec<i64> = reaped.iter().map(|j| j.job_id).collect();
    print_json(&json!({ "reaped": ids }), false)
}
