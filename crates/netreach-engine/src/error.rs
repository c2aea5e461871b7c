//! Error types for the netreach-engine crate.

use std::net::IpAddr;

use netreach_core::{ModelError, ZoneRef};
use netreach_graph::GraphError;
use thiserror::Error;

/// Failures that stop an engine from being built.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Snapshot error: {0}")]
    Model(#[from] ModelError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A query that cannot be answered as asked. The engine itself is unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("{ip} is in more than one zone ({}); name the zone explicitly", join(.zones))]
    AmbiguousZone { ip: IpAddr, zones: Vec<ZoneRef> },

    #[error("{ip} is not in any zone's address space")]
    NoZone { ip: IpAddr },

    #[error("Unknown zone: {zone}")]
    UnknownZone { zone: ZoneRef },
}

fn join(zones: &[ZoneRef]) -> String {
    zones
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, EngineError>;
