//! Query and verdict types.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use netreach_core::{Action, Flow, Protocol, RuleSetId, ServiceSet, ZoneRef};
use netreach_graph::LinkReason;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reachability question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowQuery {
    pub source: IpAddr,
    pub destination: IpAddr,
    pub protocol: Protocol,
    /// Destination port; absent means every port of `protocol`.
    #[serde(default)]
    pub port: Option<u16>,
    /// Explicit source zone, bypassing address lookup.
    #[serde(default)]
    pub source_zone: Option<ZoneRef>,
    #[serde(default)]
    pub destination_zone: Option<ZoneRef>,
}

impl FlowQuery {
    pub fn new(source: IpAddr, destination: IpAddr, protocol: Protocol, port: Option<u16>) -> Self {
        Self {
            source,
            destination,
            protocol,
            port,
            source_zone: None,
            destination_zone: None,
        }
    }

    pub fn with_source_zone(mut self, zone: ZoneRef) -> Self {
        self.source_zone = Some(zone);
        self
    }

    pub fn with_destination_zone(mut self, zone: ZoneRef) -> Self {
        self.destination_zone = Some(zone);
        self
    }

    pub fn flow(&self) -> Flow {
        Flow {
            source: self.source,
            destination: self.destination,
            protocol: self.protocol,
            port: self.port,
        }
    }

    /// The services the query asks about.
    pub fn offered(&self) -> ServiceSet {
        ServiceSet::for_flow(self.protocol, self.port)
    }
}

/// How a hop handled the traffic that reached it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum HopDecision {
    /// A rule claimed the traffic.
    Rule { index: u32, action: Action },
    /// No rule matched; the rule set default applied.
    Default { action: Action },
    /// Unfiltered inter-device link.
    Transit { link: LinkReason },
}

/// One edge traversed by a verdict path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathHop {
    pub from: ZoneRef,
    pub to: ZoneRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<RuleSetId>,
    pub decision: HopDecision,
    /// Services that got through this hop.
    pub services: ServiceSet,
}

impl PathHop {
    pub fn is_filtering(&self) -> bool {
        self.rule_set.is_some()
    }
}

/// Why a verdict came out the way it did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum VerdictReason {
    Permitted,
    /// Source and destination are in the same zone; no rule set applies.
    IntraZone,
    DeniedByRule { rule_set: RuleSetId, rule_index: u32 },
    DeniedByDefault { rule_set: RuleSetId },
    /// The zones are not connected at all, whatever the rules say.
    NoPath,
}

/// The engine's answer to a [`FlowQuery`].
#[derive(Debug, Clone, Serialize)]
pub struct ReachabilityVerdict {
    pub id: Uuid,
    /// Digest of the snapshot this verdict was computed on.
    pub snapshot_digest: String,
    pub computed_at: DateTime<Utc>,
    pub query: FlowQuery,
    pub source_zone: ZoneRef,
    pub destination_zone: ZoneRef,
    pub allowed: bool,
    pub reason: VerdictReason,
    /// Edges from the source zone; ends at the destination when allowed,
    /// at the denying hop otherwise.
    pub path: Vec<PathHop>,
    /// Services still permitted after each hop of `path`.
    pub narrowing: Vec<ServiceSet>,
    /// Services that reach the destination.
    pub permitted: ServiceSet,
}

impl ReachabilityVerdict {
    /// Path hops governed by a rule set, skipping transit links.
    pub fn filtering_hops(&self) -> impl Iterator<Item = &PathHop> {
        self.path.iter().filter(|hop| hop.is_filtering())
    }
}
