//! Plain graph export for external renderers.

use netreach_core::{DeviceId, NetworkSet, RuleSetId, ServiceSet, ZoneRef};
use serde::Serialize;

use crate::graph::{DeviceGraph, EdgeKind};
use crate::topology::LinkReason;

#[derive(Debug, Clone, Serialize)]
pub struct GraphExport {
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportNode {
    /// `device:zone`.
    pub id: ZoneRef,
    pub device: DeviceId,
    pub zone: String,
    pub networks: NetworkSet,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportEdge {
    pub from: ZoneRef,
    pub to: ZoneRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<RuleSetId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkReason>,
    /// Whether any service can cross this edge for some flow.
    pub permitted: bool,
    /// Upper bound on the services that can cross.
    pub services: ServiceSet,
}

impl DeviceGraph {
    /// Flatten the graph into nodes and edges, in node and adjacency order.
    pub fn export(&self) -> GraphExport {
        let nodes = self
            .nodes
            .iter()
            .map(|n| ExportNode {
                id: n.zone.clone(),
                device: n.zone.device.clone(),
                zone: n.zone.zone.clone(),
                networks: n.networks.clone(),
            })
            .collect();

        let mut edges = Vec::with_capacity(self.edge_count());
        for (from, outgoing) in self.adjacency.iter().enumerate() {
            for edge in outgoing {
                let (rule_set, link, services) = match &edge.kind {
                    EdgeKind::Filtered(rs) => (Some(rs.id.clone()), None, rs.service_envelope()),
                    EdgeKind::Transit(reason) => (None, Some(reason.clone()), ServiceSet::any()),
                };
                edges.push(ExportEdge {
                    from: self.nodes[from].zone.clone(),
                    to: self.nodes[edge.target_index].zone.clone(),
                    rule_set,
                    link,
                    permitted: !services.is_empty(),
                    services,
                });
            }
        }

        GraphExport { nodes, edges }
    }
}
