use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

use commands::util::GlobalArgs;
use commands::{ConnectorsArgs, JobsCmd, ReapArgs, StatusArgs, WorkerArgs};

#[derive(Parser)]
#[command(name = "lochness", version, about = "Lochness job ledger and provenance tools")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit, list and inspect jobs in the local ledger
    Jobs {
        #[command(subcommand)]
        cmd: JobsCmd,
    },
    /// Derived sync status for a project/site
    Status(StatusArgs),
    /// Force long-running jobs into error
    Reap(ReapArgs),
    /// Run a scheduler worker pool until ctrl-c
    Worker(WorkerArgs),
    /// List builtin connector types
    Connectors(ConnectorsArgs),
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Jobs { cmd } => commands::jobs::run(&cli.global, cmd),
        Commands::Status(args) => commands::status::run(&cli.global, args),
        Commands::Reap(args) => commands::reap::run(&cli.global, args),
        Commands::Worker(args) => {
            lochness_otel::init();
            commands::worker::run(&cli.global, args)
        }
        Commands::Connectors(args) => commands::connectors::run(args),
    }
}

fn main() {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Worker(_)) {
        let _ = fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }
    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn state_dir_is_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "lochness",
            "jobs",
            "list",
            "--state-dir",
            "/tmp/lochness",
        ])
        .expect("parse");
        assert_eq!(
            cli.global.state_dir.as_deref(),
            Some(std::path::Path::new("/tmp/lochness"))
        );
    }

    #[test]
    fn reap_takes_older_than_secs() {
        let cli = Cli::try_parse_from(["lochness", "reap", "--older-than-secs", "60"])
            .expect("parse");
        assert!(matches!(cli.command, Commands::Reap(_)));
    }
}
