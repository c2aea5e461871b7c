//! Breadth-first reachability search over the device graph.
//!
//! Each search state carries the services still permitted along the path
//! that produced it. A node is only re-entered when a path arrives with
//! services not already explored there, so the search terminates on cyclic
//! topologies: every re-entry strictly grows a finite set.

use std::collections::VecDeque;
use std::net::IpAddr;

use netreach_core::{Action, RuleSetId, ServiceSet};
use netreach_graph::{DeviceGraph, EdgeKind, ZoneEdge};

use crate::types::{HopDecision, PathHop, VerdictReason};

/// Result of a search between two distinct nodes.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Reached {
        path: Vec<PathHop>,
        permitted: ServiceSet,
    },
    Denied {
        path: Vec<PathHop>,
        reason: VerdictReason,
    },
    NoPath,
}

struct SearchState {
    node: usize,
    services: ServiceSet,
    parent: Option<usize>,
    /// The hop that produced this state; `None` for the start state.
    hop: Option<PathHop>,
}

struct Denial {
    parent: usize,
    hop: PathHop,
    reason: VerdictReason,
}

/// Search from `source` to `destination` for traffic between the given
/// addresses offering `offered`.
///
/// Edges into nodes with no topological route to `destination` are never
/// followed, so a reported denial always sits on a route to it.
pub fn search(
    graph: &DeviceGraph,
    source: usize,
    destination: usize,
    addresses: (IpAddr, IpAddr),
    offered: &ServiceSet,
) -> SearchOutcome {
    let reaching = graph.nodes_reaching(destination);
    if !reaching[source] {
        return SearchOutcome::NoPath;
    }

    let mut explored = vec![ServiceSet::empty(); graph.node_count()];
    explored[source] = offered.clone();

    let mut states = vec![SearchState {
        node: source,
        services: offered.clone(),
        parent: None,
        hop: None,
    }];
    let mut queue = VecDeque::from([0usize]);
    let mut first_denial: Option<Denial> = None;

    while let Some(current) = queue.pop_front() {
        let node = states[current].node;

        for edge in &graph.adjacency[node] {
            let target = edge.target_index;
            if !reaching[target] {
                continue;
            }

            let (hop, denial) = traverse(graph, node, edge, addresses, &states[current].services);

            if hop.services.is_empty() {
                if first_denial.is_none() {
                    if let Some(reason) = denial {
                        first_denial = Some(Denial {
                            parent: current,
                            hop,
                            reason,
                        });
                    }
                }
                continue;
            }

            if target == destination {
                let permitted = hop.services.clone();
                let mut path = path_to(&states, current);
                path.push(hop);
                return SearchOutcome::Reached { path, permitted };
            }

            if hop.services.is_subset(&explored[target]) {
                continue;
            }
            explored[target] = explored[target].union(&hop.services);

            states.push(SearchState {
                node: target,
                services: hop.services.clone(),
                parent: Some(current),
                hop: Some(hop),
            });
            queue.push_back(states.len() - 1);
        }
    }

    match first_denial {
        Some(denial) => {
            let mut path = path_to(&states, denial.parent);
            path.push(denial.hop);
            SearchOutcome::Denied {
                path,
                reason: denial.reason,
            }
        }
        None => {
            tracing::debug!(source, destination, "Search exhausted without a denying hop");
            SearchOutcome::NoPath
        }
    }
}

/// Evaluate one edge. The returned reason is set when a rule set let
/// nothing through.
fn traverse(
    graph: &DeviceGraph,
    from: usize,
    edge: &ZoneEdge,
    (source, destination): (IpAddr, IpAddr),
    arriving: &ServiceSet,
) -> (PathHop, Option<VerdictReason>) {
    let from_zone = graph.nodes[from].zone.clone();
    let to_zone = graph.nodes[edge.target_index].zone.clone();

    match &edge.kind {
        EdgeKind::Transit(link) => (
            PathHop {
                from: from_zone,
                to: to_zone,
                rule_set: None,
                decision: HopDecision::Transit { link: link.clone() },
                services: arriving.clone(),
            },
            None,
        ),
        EdgeKind::Filtered(rule_set) => {
            let evaluation = rule_set.evaluate_services(source, destination, arriving);
            let decision = match evaluation.deciding_hit() {
                Some(hit) => match hit.rule {
                    Some(index) => HopDecision::Rule {
                        index,
                        action: hit.action,
                    },
                    None => HopDecision::Default { action: hit.action },
                },
                None => HopDecision::Default {
                    action: rule_set.default_action,
                },
            };
            let reason = evaluation
                .permitted
                .is_empty()
                .then(|| denial_reason(&rule_set.id, &decision));

            (
                PathHop {
                    from: from_zone,
                    to: to_zone,
                    rule_set: Some(rule_set.id.clone()),
                    decision,
                    services: evaluation.permitted,
                },
                reason,
            )
        }
    }
}

fn denial_reason(rule_set: &RuleSetId, decision: &HopDecision) -> VerdictReason {
    match decision {
        HopDecision::Rule {
            index,
            action: Action::Deny,
        } => VerdictReason::DeniedByRule {
            rule_set: rule_set.clone(),
            rule_index: *index,
        },
        _ => VerdictReason::DeniedByDefault {
            rule_set: rule_set.clone(),
        },
    }
}

/// Reconstruct the hops leading to `state`.
fn path_to(states: &[SearchState], state: usize) -> Vec<PathHop> {
    let mut hops = Vec::new();
    let mut cursor = Some(state);
    while let Some(index) = cursor {
        let s = &states[index];
        if let Some(hop) = &s.hop {
            hops.push(hop.clone());
        }
        cursor = s.parent;
    }
    hops.reverse();
    hops
}
