use anyhow::Result;
use clap::{Args, ValueEnum};
use lochness_core::{Granularity, StatusScope, StreamStatus, SyncStatus};
use serde_json::json;

use super::util::{format_ts, print_json, GlobalArgs};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum GroupByArg {
    Subject,
    Source,
}

#[derive(Args)]
pub struct StatusArgs {
    #[arg(long = "project")]
    project_id: String,
    #[arg(long = "site")]
    site_id: String,
    #[arg(long = "subject")]
    subject_id: Option<String>,
    #[arg(long = "source")]
    data_source_name: Option<String>,
    /// Defaults to subject when --subject is given, else source
    #[arg(long, value_enum)]
    group_by: Option<GroupByArg>,
    #[arg(long)]
    json: bool,
    #[arg(long, requires = "json")]
    pretty: bool,
}

pub fn run(global: &GlobalArgs, args: StatusArgs) -> Result<()> {
    let (_, kernel) = global.open_kernel()?;
    let mut scope = StatusScope::new(args.project_id, args.site_id);
    if let Some(name) = args.data_source_name {
        scope = scope.source(name);
    }
    if let Some(subject) = args.subject_id {
        scope = scope.subject(subject);
    }
    let granularity = match args.group_by {
        Some(GroupByArg::Subject) => Granularity::Subject,
        Some(GroupByArg::Source) => Granularity::Source,
        None => scope.default_granularity(),
    };
    let statuses = kernel.sync_status(&scope, granularity)?;
    if args.json {
        return print_json(&json!({ "statuses": statuses }), args.pretty);
    }
    render(&statuses);
    Ok(())
}

fn mark(status: StreamStatus) -> &'static str {
    match status {
        StreamStatus::Success => "Success",
        StreamStatus::None => "None",
    }
}

fn render(statuses: &[SyncStatus]) {
    if statuses.is_empty() {
        println!("(no provenance recorded)");
        return;
    }
    println!(
        "{:<14}  {:<16}  {:<8} {:>6}  {:<24}  {:<8} {:>6}  {:<24}  {:>6}",
        "subject", "source", "pull", "n", "last_pull", "push", "n", "last_push", "files"
    );
    for s in statuses {
        println!(
            "{:<14}  {:<16}  {:<8} {:>6}  {:<24}  {:<8} {:>6}  {:<24}  {:>6}",
            s.subject_id.as_deref().unwrap_or("*"),
            s.data_source_name.as_deref().unwrap_or("*"),
            mark(s.pull_status),
            s.pull_count,
            format_ts(s.last_pull.as_ref()),
            mark(s.push_status),
            s.push_count,
            format_ts(s.last_push.as_ref()),
            s.file_count,
        );
    }
}
