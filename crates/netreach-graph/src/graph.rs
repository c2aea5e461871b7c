//! The zone-level device graph.
//!
//! Zones are stored in a dense arena with an adjacency list per node. Node
//! indices follow snapshot device order, then each device's declared zone
//! order; outgoing edges are sorted by target index. Those two orders fix the
//! BFS exploration order and so make queries reproducible.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

use netreach_core::{NetworkSet, ResolvedRuleSet, ResolvedSnapshot, ZoneRef};

use crate::error::{GraphError, Result};
use crate::topology::{self, LinkReason, TopologyInference};

/// A zone node.
#[derive(Debug, Clone)]
pub struct ZoneNode {
    /// Dense index (0..N-1).
    pub index: usize,
    pub zone: ZoneRef,
    /// Interface subnets plus the zone's resolved address book.
    pub networks: NetworkSet,
}

/// What governs traffic along an edge.
#[derive(Debug, Clone)]
pub enum EdgeKind {
    /// Traffic is evaluated against a device rule set.
    Filtered(Arc<ResolvedRuleSet>),
    /// Inter-device link with no device-level filtering.
    Transit(LinkReason),
}

#[derive(Debug, Clone)]
pub struct ZoneEdge {
    pub target_index: usize,
    pub kind: EdgeKind,
}

/// Immutable zone graph over one resolved snapshot.
#[derive(Debug, Clone)]
pub struct DeviceGraph {
    pub nodes: Vec<ZoneNode>,
    /// `adjacency[i]` = outgoing edges from node `i`.
    pub adjacency: Vec<Vec<ZoneEdge>>,
    pub node_index: HashMap<ZoneRef, usize>,
}

impl DeviceGraph {
    /// Build the graph from a resolved snapshot.
    ///
    /// Fails with [`GraphError::Topology`] when a rule set or link names a
    /// zone the device does not declare.
    pub fn build(resolved: &ResolvedSnapshot, inference: TopologyInference) -> Result<Self> {
        let snapshot = &resolved.snapshot;
        let mut nodes = Vec::new();
        let mut node_index = HashMap::new();

        for (device, resolved_device) in snapshot.devices.iter().zip(&resolved.devices) {
            for zone in &device.zones {
                let mut subnets = Vec::new();
                for name in &zone.interfaces {
                    if let Some(interface) = device.interface(name) {
                        subnets.extend(interface.addresses.iter().map(|a| a.trunc()));
                    }
                }
                let mut networks = NetworkSet::from_networks(&subnets);
                if let Some(book) = resolved_device.zone_books.get(&zone.name) {
                    networks = networks.union(book);
                }

                let zone_ref = ZoneRef {
                    device: device.id.clone(),
                    zone: zone.name.clone(),
                };
                let index = nodes.len();
                node_index.insert(zone_ref.clone(), index);
                nodes.push(ZoneNode {
                    index,
                    zone: zone_ref,
                    networks,
                });
            }
        }

        let mut adjacency: Vec<Vec<ZoneEdge>> = vec![Vec::new(); nodes.len()];
        let lookup = |zone: &ZoneRef| -> Result<usize> {
            node_index.get(zone).copied().ok_or_else(|| GraphError::Topology {
                device: zone.device.clone(),
                zone: zone.zone.clone(),
            })
        };

        for resolved_device in &resolved.devices {
            for rule_set in &resolved_device.rule_sets {
                let from = lookup(&ZoneRef {
                    device: resolved_device.id.clone(),
                    zone: rule_set.id.from_zone.clone(),
                })?;
                let to = lookup(&ZoneRef {
                    device: resolved_device.id.clone(),
                    zone: rule_set.id.to_zone.clone(),
                })?;
                adjacency[from].push(ZoneEdge {
                    target_index: to,
                    kind: EdgeKind::Filtered(Arc::clone(rule_set)),
                });
            }
        }

        let links = inference.infer(&snapshot.devices);
        if let Some(device) = topology::unknown_devices(&links, &snapshot.devices).first() {
            return Err(GraphError::UnknownDevice {
                device: (*device).clone(),
            });
        }
        for link in links {
            let from = lookup(&link.from)?;
            let to = lookup(&link.to)?;
            tracing::debug!(
                from = %link.from,
                to = %link.to,
                reason = ?link.reason,
                "Transit edge"
            );
            adjacency[from].push(ZoneEdge {
                target_index: to,
                kind: EdgeKind::Transit(link.reason),
            });
        }

        for edges in &mut adjacency {
            edges.sort_by_key(|e| e.target_index);
        }

        let graph = Self {
            nodes,
            adjacency,
            node_index,
        };
        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            strategy = ?inference,
            "Device graph built"
        );
        Ok(graph)
    }

    pub fn node(&self, zone: &ZoneRef) -> Option<usize> {
        self.node_index.get(zone).copied()
    }

    /// Nodes whose address space contains `ip`, in node order.
    pub fn zones_containing(&self, ip: IpAddr) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| n.networks.contains(ip))
            .map(|n| n.index)
            .collect()
    }

    /// `result[i]` is true when node `i` has some path to `target`, rules ignored.
    pub fn nodes_reaching(&self, target: usize) -> Vec<bool> {
        let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (from, edges) in self.adjacency.iter().enumerate() {
            for edge in edges {
                reverse[edge.target_index].push(from);
            }
        }

        let mut reaching = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        reaching[target] = true;
        queue.push_back(target);
        while let Some(node) = queue.pop_front() {
            for &prev in &reverse[node] {
                if !reaching[prev] {
                    reaching[prev] = true;
                    queue.push_back(prev);
                }
            }
        }
        reaching
    }

    /// Number of zone nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of directed edges, filtered and transit.
    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(|edges| edges.len()).sum()
    }
}
