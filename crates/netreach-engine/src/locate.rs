//! Mapping query addresses to zone nodes.

use std::net::IpAddr;

use netreach_core::ZoneRef;
use netreach_graph::DeviceGraph;

use crate::error::QueryError;

/// Find the node for one end of a query.
///
/// An explicit zone wins. Otherwise `ip` must fall in exactly one zone's
/// address space; containment in several is reported, never guessed.
pub fn locate(
    graph: &DeviceGraph,
    ip: IpAddr,
    explicit: Option<&ZoneRef>,
) -> Result<usize, QueryError> {
    if let Some(zone) = explicit {
        return graph
            .node(zone)
            .ok_or_else(|| QueryError::UnknownZone { zone: zone.clone() });
    }

    match graph.zones_containing(ip).as_slice() {
        [] => Err(QueryError::NoZone { ip }),
        [only] => Ok(*only),
        many => Err(QueryError::AmbiguousZone {
            ip,
            zones: many.iter().map(|&i| graph.nodes[i].zone.clone()).collect(),
        }),
    }
}
