use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lochness_core::{Catalog, Config, StaticCatalog};
use lochness_events::Bus;
use lochness_kernel::Kernel;
use lochness_scheduler::{Scheduler, SchedulerSettings};
use serde_json::Value as JsonValue;

/// Flags shared by every subcommand.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct GlobalArgs {
    /// Config file (defaults to LOCHNESS_CONFIG, then configs/default.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// State directory holding lochness.sqlite; overrides config and env
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn load_config(&self) -> Result<Config> {
        let mut config = lochness_core::load_effective(self.config.as_deref())?;
        if let Some(dir) = &self.state_dir {
            config.storage.state_dir = Some(dir.display().to_string());
        }
        Ok(config)
    }

    pub fn open_kernel(&self) -> Result<(Config, Kernel)> {
        let config = self.load_config()?;
        let dir = config.state_dir();
        let kernel = Kernel::open_with(&dir, config.busy_timeout())
            .with_context(|| format!("opening ledger in {}", dir.display()))?;
        Ok((config, kernel))
    }
}

/// Same wiring as the server: builtin connectors, configured catalog and keystore.
pub fn open_scheduler(config: &Config, kernel: Kernel, bus: Bus) -> Result<Scheduler> {
    let registry = Arc::new(lochness_connectors::builtin_registry());
    let (catalog, rejected) = StaticCatalog::build(
        &registry,
        config.data_sources.iter().cloned(),
        config.data_sinks.iter().cloned(),
    );
    for entry in &rejected {
        eprintln!("warning: {} '{}' rejected: {}", entry.kind, entry.name, entry.error);
    }
    let catalog: Arc<dyn Catalog> = Arc::new(catalog);
    let keystore = config.keystore.build()?;
    Ok(Scheduler::new(
        kernel,
        registry,
        catalog,
        keystore,
        bus,
        SchedulerSettings::from_config(config),
    ))
}

pub fn print_json(value: &JsonValue, pretty: bool) -> Result<()> {
    if pretty {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{value}");
    }
    Ok(())
}

pub fn format_ts(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(lochness_core::time::format)
        .unwrap_or_else(|| "-".to_string())
}

pub fn ellipsize_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(1);
    let mut out: String = s.chars().take(keep).collect();
    out.push('…');
    out
}
