use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use lochness_core::{Job, JobFilter, JobStatus, JobType, NewJob};
use serde_json::{json, Value as JsonValue};

use super::util::{ellipsize_str, format_ts, print_json, GlobalArgs};

#[derive(Subcommand)]
pub enum JobsCmd {
    /// Enqueue a job; prints {"job_id": N}
    Submit(JobsSubmitArgs),
    /// List jobs, newest first
    List(JobsListArgs),
    /// Show one job as JSON
    Show(JobsShowArgs),
}

#[derive(Args)]
pub struct JobsSubmitArgs {
    /// Job type (data_pull, data_push, refresh_metadata, ...)
    #[arg(long)]
    job_type: String,
    #[arg(long = "project")]
    project_id: String,
    #[arg(long = "site")]
    site_id: String,
    #[arg(long = "source")]
    data_source_name: Option<String>,
    #[arg(long = "sink")]
    data_sink_name: Option<String>,
    /// Job metadata as a JSON object
    #[arg(long)]
    metadata: Option<String>,
    /// Principal recorded as requested_by
    #[arg(long)]
    requested_by: Option<String>,
}

#[derive(Args)]
pub struct JobsListArgs {
    #[arg(long = "project")]
    project_id: Option<String>,
    #[arg(long = "site")]
    site_id: Option<String>,
    #[arg(long)]
    job_type: Option<String>,
    /// pending|running|success|error
    #[arg(long)]
    status: Option<String>,
    #[arg(long = "source")]
    data_source_name: Option<String>,
    #[arg(long, default_value_t = 100)]
    limit: u32,
    #[arg(long, default_value_t = 0)]
    offset: u32,
    /// Emit raw JSON instead of a table
    #[arg(long)]
    json: bool,
    /// Pretty-print JSON output (requires --json)
    #[arg(long, requires = "json")]
    pretty: bool,
}

#[derive(Args)]
pub struct JobsShowArgs {
    job_id: i64,
}

pub fn run(global: &GlobalArgs, cmd: JobsCmd) -> Result<()> {
    let (_, kernel) = global.open_kernel()?;
    match cmd {
        JobsCmd::Submit(args) => {
            let job_metadata = args
                .metadata
                .as_deref()
                .map(serde_json::from_str::<JsonValue>)
                .transpose()
                .context("--metadata must be valid JSON")?;
            let new_job = NewJob {
                job_type: args.job_type,
                project_id: args.project_id,
                site_id: args.site_id,
                data_source_name: args.data_source_name,
                data_sink_name: args.data_sink_name,
                job_metadata,
                requested_by: args.requested_by,
            };
            let job_id = kernel.enqueue(new_job)?;
            print_json(&json!({ "job_id": job_id }), false)
        }
        JobsCmd::List(args) => {
            let status = match args.status.as_deref() {
                Some(raw) => match JobStatus::from_slug(raw) {
                    Some(status) => Some(status),
                    None => bail!("unknown status '{raw}'"),
                },
                None => None,
            };
            let filter = JobFilter {
                project_id: args.project_id,
                site_id: args.site_id,
                job_type: args.job_type.as_deref().map(JobType::from_slug),
                status,
                data_source_name: args.data_source_name,
                limit: args.limit.clamp(1, 1000),
                offset: args.offset,
            };
            let jobs = kernel.query(&filter)?;
            if args.json {
                let total = kernel.count(&filter)?;
                return print_json(&json!({ "jobs": jobs, "total": total }), args.pretty);
            }
            render_table(&jobs);
            Ok(())
        }
        JobsCmd::Show(args) => match kernel.get(args.job_id)? {
            Some(job) => print_json(&serde_json::to_value(&job)?, true),
            None => bail!("job {} not found", args.job_id),
        },
    }
}

fn render_table(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("(no jobs)");
        return;
    }
    println!(
        "{:>8}  {:<8}  {:<18}  {:<20}  {:<24}  result",
        "job_id", "status", "type", "project/site", "created"
    );
    for job in jobs {
        let scope = format!("{}/{}", job.scope.project_id, job.scope.site_id);
        println!(
            "{:>8}  {:<8}  {:<18}  {:<20}  {:<24}  {}",
            job.job_id,
            job.status.as_str(),
            ellipsize_str(job.job_type.as_str(), 18),
            ellipsize_str(&scope, 20),
            format_ts(Some(&job.created_at)),
            ellipsize_str(job.result.as_deref().unwrap_or("-"), 60),
        );
    }
}
