use std::time::Duration;

use anyhow::Result;
use clap::Args;
use lochness_events::Bus;

use super::util::{open_scheduler, GlobalArgs};

#[derive(Args)]
pub struct WorkerArgs {
    /// Worker loops to run (defaults to scheduler.workers)
    #[arg(long)]
    workers: Option<usize>,
    /// Drain pending jobs once and exit instead of polling
    #[arg(long)]
    once: bool,
}

pub fn run(global: &GlobalArgs, args: WorkerArgs) -> Result<()> {
    let (mut config, kernel) = global.open_kernel()?;
    if let Some(workers) = args.workers {
        config.scheduler.workers = Some(workers.max(1));
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let scheduler = open_scheduler(&config, kernel, Bus::default())?;
        if args.once {
            let finished = scheduler.drain("cli").await?;
            for job in &finished {
                println!("{} {} {}", job.job_id, job.status, job.result.as_deref().unwrap_or(""));
            }
            return Ok(());
        }
        let tasks = scheduler.spawn();
        let workers = scheduler.settings().workers;
        tracing::info!(workers, "worker pool running; ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
        tracing::info!("stopping worker pool");
        tasks.shutdown_with_grace(Duration::from_secs(5)).await;
        Ok(())
    })
}
