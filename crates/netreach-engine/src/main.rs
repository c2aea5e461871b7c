//! CLI entry point for the netreach reachability engine.
//!
//! Reads a JSON snapshot, writes JSON results to stdout. Logs go to stderr.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use netreach_core::{Protocol, ZoneRef};
use netreach_engine::{EngineConfig, FlowQuery, ReachabilityEngine};

#[derive(Parser)]
#[command(name = "netreach")]
#[command(about = "Offline firewall reachability analysis over a device snapshot")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Snapshot JSON file.
    #[arg(short, long, global = true, default_value = "snapshot.json")]
    snapshot: PathBuf,

    /// Config file prefix (default: netreach).
    #[arg(short, long, default_value = "netreach", global = true)]
    config: String,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Load, resolve and build the graph; print a summary.
    Validate,
    /// Ask whether a flow is permitted.
    Query {
        #[arg(long)]
        src: IpAddr,
        #[arg(long)]
        dst: IpAddr,
        /// Protocol name or number.
        #[arg(long, default_value = "tcp")]
        proto: Protocol,
        /// Destination port; omit for every port.
        #[arg(long)]
        port: Option<u16>,
        /// Source zone as device:zone.
        #[arg(long)]
        src_zone: Option<ZoneRef>,
        /// Destination zone as device:zone.
        #[arg(long)]
        dst_zone: Option<ZoneRef>,
    },
    /// Print the zone graph.
    Graph,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if cli.log_json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }

    let config = EngineConfig::load(&cli.config)?;
    let engine = ReachabilityEngine::load_file(&cli.snapshot, &config)?;

    match cli.command {
        Command::Validate => {
            let resolved = engine.resolved();
            let summary = serde_json::json!({
                "digest": engine.digest(),
                "tool_run_id": resolved.snapshot.tool_run_id,
                "devices": resolved.devices.len(),
                "network_books": resolved.books.network_count(),
                "service_books": resolved.books.service_count(),
                "nodes": engine.graph().node_count(),
                "edges": engine.graph().edge_count(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Query {
            src,
            dst,
            proto,
            port,
            src_zone,
            dst_zone,
        } => {
            let mut query = FlowQuery::new(src, dst, proto, port);
            query.source_zone = src_zone;
            query.destination_zone = dst_zone;

            match engine.query(&query) {
                Ok(verdict) => println!("{}", serde_json::to_string_pretty(&verdict)?),
                Err(e) => {
                    eprintln!("query failed: {e}");
                    return Ok(ExitCode::from(2));
                }
            }
        }
        Command::Graph => {
            println!("{}", serde_json::to_string_pretty(&engine.export())?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
