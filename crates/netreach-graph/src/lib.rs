//! netreach-graph: the zone-level device graph.
//!
//! Nodes are security zones; edges are either filtered by the rule set a
//! device applies to that zone pair, or unfiltered transit links between
//! devices found by topology inference. The graph is built once per
//! resolved snapshot and is immutable afterwards.

pub mod error;
pub mod export;
pub mod graph;
pub mod topology;

pub use error::{GraphError, Result};
pub use export::{ExportEdge, ExportNode, GraphExport};
pub use graph::{DeviceGraph, EdgeKind, ZoneEdge, ZoneNode};
pub use topology::{Link, LinkReason, TopologyInference};
