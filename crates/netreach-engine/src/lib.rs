//! netreach-engine: flow reachability over a resolved device graph.
//!
//! Loads a snapshot, resolves every book, builds the zone graph, and answers
//! "can this flow get from here to there" with the path and the rule
//! decisions that explain the answer. Every verdict is stamped with the
//! digest of the snapshot it was computed on.

pub mod config;
pub mod error;
pub mod locate;
pub mod search;
pub mod types;

pub use crate::config::EngineConfig;
pub use crate::error::{EngineError, QueryError};
pub use crate::types::{FlowQuery, HopDecision, PathHop, ReachabilityVerdict, VerdictReason};

use std::path::Path;

use chrono::Utc;
use netreach_core::{resolve_snapshot, ResolvedSnapshot, ServiceSet, Snapshot};
use netreach_graph::{DeviceGraph, GraphExport};
use uuid::Uuid;

use crate::error::Result;
use crate::search::SearchOutcome;

/// A loaded snapshot ready to answer queries.
///
/// Immutable after [`ReachabilityEngine::load`]; queries take `&self` and
/// may run concurrently.
pub struct ReachabilityEngine {
    resolved: ResolvedSnapshot,
    graph: DeviceGraph,
}

impl ReachabilityEngine {
    /// Validate, resolve, and build the graph for `snapshot`.
    pub fn load(snapshot: Snapshot, config: &EngineConfig) -> Result<Self> {
        let resolved = resolve_snapshot(snapshot, &config.resolve_options())?;
        let graph = DeviceGraph::build(&resolved, config.topology)?;
        tracing::info!(
            digest = %resolved.digest,
            tool_run_id = ?resolved.snapshot.tool_run_id,
            devices = resolved.devices.len(),
            "Engine loaded"
        );
        Ok(Self { resolved, graph })
    }

    /// Load a JSON snapshot file.
    pub fn load_file(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        let snapshot = Snapshot::from_json(&input)?;
        Self::load(snapshot, config)
    }

    pub fn query(&self, query: &FlowQuery) -> std::result::Result<ReachabilityVerdict, QueryError> {
        crate::query(&self.graph, query, &self.resolved.digest)
    }

    pub fn export(&self) -> GraphExport {
        self.graph.export()
    }

    pub fn graph(&self) -> &DeviceGraph {
        &self.graph
    }

    pub fn resolved(&self) -> &ResolvedSnapshot {
        &self.resolved
    }

    pub fn digest(&self) -> &str {
        &self.resolved.digest
    }
}

/// Answer `query` over `graph`, stamping the verdict with `digest`.
pub fn query(
    graph: &DeviceGraph,
    query: &FlowQuery,
    digest: &str,
) -> std::result::Result<ReachabilityVerdict, QueryError> {
    let source = locate::locate(graph, query.source, query.source_zone.as_ref())?;
    let destination = locate::locate(graph, query.destination, query.destination_zone.as_ref())?;
    let offered = query.offered();

    let (allowed, reason, path, permitted) = if source == destination {
        (true, VerdictReason::IntraZone, Vec::new(), offered)
    } else {
        match search::search(
            graph,
            source,
            destination,
            (query.source, query.destination),
            &offered,
        ) {
            SearchOutcome::Reached { path, permitted } => {
                (true, VerdictReason::Permitted, path, permitted)
            }
            SearchOutcome::Denied { path, reason } => (false, reason, path, ServiceSet::empty()),
            SearchOutcome::NoPath => {
                (false, VerdictReason::NoPath, Vec::new(), ServiceSet::empty())
            }
        }
    };

    let verdict = ReachabilityVerdict {
        id: Uuid::new_v4(),
        snapshot_digest: digest.to_string(),
        computed_at: Utc::now(),
        query: query.clone(),
        source_zone: graph.nodes[source].zone.clone(),
        destination_zone: graph.nodes[destination].zone.clone(),
        allowed,
        reason,
        narrowing: path.iter().map(|hop| hop.services.clone()).collect(),
        path,
        permitted,
    };

    tracing::debug!(
        verdict_id = %verdict.id,
        source = %verdict.source_zone,
        destination = %verdict.destination_zone,
        allowed = verdict.allowed,
        hops = verdict.path.len(),
        "Query answered"
    );
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netreach_core::{AclZone, Device, DeviceId, Interface, Protocol};

    fn make_snapshot() -> Snapshot {
        Snapshot {
            devices: vec![Device {
                id: DeviceId::new("fw"),
                interfaces: vec![Interface {
                    name: "eth0".to_string(),
                    addresses: vec!["10.0.0.1/24".parse().unwrap()],
                }],
                zones: vec![AclZone {
                    name: "lan".to_string(),
                    interfaces: vec!["eth0".to_string()],
                    address_book: None,
                }],
                rule_sets: vec![],
                routes: vec![],
                adjacencies: vec![],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_intra_zone_allowed() {
        let engine = ReachabilityEngine::load(make_snapshot(), &EngineConfig::default()).unwrap();
        let verdict = engine
            .query(&FlowQuery::new(
                "10.0.0.5".parse().unwrap(),
                "10.0.0.6".parse().unwrap(),
                Protocol::TCP,
                Some(22),
            ))
            .unwrap();
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, VerdictReason::IntraZone);
        assert!(verdict.path.is_empty());
        assert_eq!(verdict.snapshot_digest, engine.digest());
    }

    #[test]
    fn test_address_outside_every_zone() {
        let engine = ReachabilityEngine::load(make_snapshot(), &EngineConfig::default()).unwrap();
        let err = engine
            .query(&FlowQuery::new(
                "10.0.0.5".parse().unwrap(),
                "192.0.2.1".parse().unwrap(),
                Protocol::TCP,
                Some(22),
            ))
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::NoZone {
                ip: "192.0.2.1".parse().unwrap()
            }
        );
    }

    #[test]
    fn test_unknown_explicit_zone() {
        let engine = ReachabilityEngine::load(make_snapshot(), &EngineConfig::default()).unwrap();
        let query = FlowQuery::new(
            "10.0.0.5".parse().unwrap(),
            "10.0.0.6".parse().unwrap(),
            Protocol::UDP,
            None,
        )
        .with_destination_zone("fw:guest".parse().unwrap());
        assert!(matches!(
            engine.query(&query),
            Err(QueryError::UnknownZone { .. })
        ));
    }
}
