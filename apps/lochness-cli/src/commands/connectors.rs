use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::util::print_json;

#[derive(Args)]
pub struct ConnectorsArgs {
    #[arg(long)]
    json: bool,
}

pub fn run(args: ConnectorsArgs) -> Result<()> {
    let supported = lochness_connectors::builtin_registry().supported();
    if args.json {
        return print_json(&json!({ "connectors": supported }), false);
    }
    for info in supported {
        let caps = info.capabilities;
        let mut flags = Vec::new();
        if caps.pull {
            flags.push("pull");
        }
        if caps.push {
            flags.push("push");
        }
        if caps.refresh_metadata {
            flags.push("refresh_metadata");
        }
        println!("{:<12} {}", info.type_tag, flags.join(","));
    }
    Ok(())
}
