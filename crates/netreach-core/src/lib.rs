//! netreach-core: canonical access-control objects and their resolution.
//!
//! This crate holds the vendor-neutral model every parser produces and every
//! analysis consumes:
//! - Network and service books, with nested references and exclusions
//! - Zones, ordered rule sets and rules
//! - Interval-based address and service sets
//! - The book resolver that flattens references into concrete sets
//! - First-match rule evaluation over single flows and service sets

pub mod books;
pub mod error;
pub mod ranges;
pub mod resolver;
pub mod rules;
pub mod sets;
pub mod snapshot;
pub mod types;

pub use books::{BookCatalog, NetworkBook, NetworkEntry, ServiceBook, ServiceEntry};
pub use error::{ModelError, Result};
pub use resolver::{
    resolve_snapshot, BookResolver, BookTable, ResolveOptions, ResolvedDevice, ResolvedSnapshot,
};
pub use rules::{AclRule, Evaluation, ResolvedRule, ResolvedRuleSet, RuleHit, RuleSet, RuleSetId};
pub use sets::{NetworkSet, PortSet, ServiceSet};
pub use snapshot::{AclZone, Adjacency, Device, Interface, Route, Snapshot};
pub use types::{Action, BookKey, DeviceId, Flow, PortRange, Protocol, Scope, ZoneRef};
