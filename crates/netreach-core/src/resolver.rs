//! Book resolution: expands nested book references into concrete sets.
//!
//! Resolution is a depth-first walk over the catalog with an explicit stack
//! of books currently being expanded. Reaching a book already on the stack is
//! a cycle and fails the whole load. Completed books are memoized by
//! [`BookKey`] for the lifetime of the resolver.
//!
//! Snapshot resolution runs in three phases:
//! 1. global books, into a shared read-only [`BookTable`];
//! 2. each device independently (in parallel when enabled), with a private
//!    cache that only ever holds that device's scoped books;
//! 3. a single-writer merge of the per-device caches into the shared table.

use std::collections::HashMap;
use std::sync::Arc;

use ipnet::IpNet;
use rayon::prelude::*;

use crate::books::{BookCatalog, NetworkEntry, ServiceEntry};
use crate::error::{ModelError, Result};
use crate::rules::{ResolvedRule, ResolvedRuleSet, RuleSet, RuleSetId};
use crate::sets::{NetworkSet, ServiceSet};
use crate::snapshot::{Device, Snapshot};
use crate::types::{BookKey, DeviceId, Scope};

/// Resolved sets keyed by the book that produced them.
#[derive(Debug, Clone, Default)]
pub struct BookTable {
    networks: HashMap<BookKey, Arc<NetworkSet>>,
    services: HashMap<BookKey, Arc<ServiceSet>>,
}

impl BookTable {
    pub fn network(&self, key: &BookKey) -> Option<&Arc<NetworkSet>> {
        self.networks.get(key)
    }

    pub fn service(&self, key: &BookKey) -> Option<&Arc<ServiceSet>> {
        self.services.get(key)
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Absorb another table. Keys are scoped, so distinct devices never collide.
    pub fn merge(&mut self, other: BookTable) {
        self.networks.extend(other.networks);
        self.services.extend(other.services);
    }
}

/// Expands book references against a catalog.
pub struct BookResolver<'a> {
    catalog: &'a BookCatalog,
    shared: Option<&'a BookTable>,
    cache: BookTable,
    in_progress: Vec<BookKey>,
}

impl<'a> BookResolver<'a> {
    pub fn new(catalog: &'a BookCatalog) -> Self {
        Self {
            catalog,
            shared: None,
            cache: BookTable::default(),
            in_progress: Vec::new(),
        }
    }

    /// A resolver that reads already-resolved books from `shared` before
    /// resolving anything itself.
    pub fn with_shared(catalog: &'a BookCatalog, shared: &'a BookTable) -> Self {
        Self {
            shared: Some(shared),
            ..Self::new(catalog)
        }
    }

    /// Resolve the network book `name` as seen from `scope`.
    pub fn resolve_network(&mut self, name: &str, scope: &Scope) -> Result<Arc<NetworkSet>> {
        let key = self
            .catalog
            .lookup_network(name, scope)
            .ok_or_else(|| unknown(name, scope))?;
        self.network_by_key(&key)
    }

    /// Resolve the service book `name` as seen from `scope`.
    pub fn resolve_service(&mut self, name: &str, scope: &Scope) -> Result<Arc<ServiceSet>> {
        let key = self
            .catalog
            .lookup_service(name, scope)
            .ok_or_else(|| unknown(name, scope))?;
        self.service_by_key(&key)
    }

    pub fn network_by_key(&mut self, key: &BookKey) -> Result<Arc<NetworkSet>> {
        if let Some(set) = self.shared.and_then(|t| t.network(key)) {
            return Ok(Arc::clone(set));
        }
        if let Some(set) = self.cache.network(key) {
            return Ok(Arc::clone(set));
        }
        self.enter(key)?;

        let catalog = self.catalog;
        let result = match catalog.network(key) {
            Some(book) => self
                .network_entries(&book.entries, &key.scope)
                .and_then(|included| {
                    let excluded = self.network_entries(&book.exclusions, &key.scope)?;
                    Ok(included.subtract(&excluded))
                }),
            None => Err(unknown(&key.name, &key.scope)),
        };
        self.in_progress.pop();

        let set = Arc::new(result?);
        tracing::debug!(book = %key, ranges = set.range_count(), "Network book resolved");
        self.cache.networks.insert(key.clone(), Arc::clone(&set));
        Ok(set)
    }

    pub fn service_by_key(&mut self, key: &BookKey) -> Result<Arc<ServiceSet>> {
        if let Some(set) = self.shared.and_then(|t| t.service(key)) {
            return Ok(Arc::clone(set));
        }
        if let Some(set) = self.cache.service(key) {
            return Ok(Arc::clone(set));
        }
        self.enter(key)?;

        let catalog = self.catalog;
        let result = match catalog.service(key) {
            Some(book) => self
                .service_entries(&book.entries, &key.scope)
                .and_then(|included| {
                    let excluded = self.service_entries(&book.exclusions, &key.scope)?;
                    Ok(included.subtract(&excluded))
                }),
            None => Err(unknown(&key.name, &key.scope)),
        };
        self.in_progress.pop();

        let set = Arc::new(result?);
        tracing::debug!(book = %key, "Service book resolved");
        self.cache.services.insert(key.clone(), Arc::clone(&set));
        Ok(set)
    }

    /// Everything this resolver resolved itself (not what it read from `shared`).
    pub fn into_table(self) -> BookTable {
        self.cache
    }

    /// Push `key` onto the in-progress stack, failing if it is already there.
    fn enter(&mut self, key: &BookKey) -> Result<()> {
        if let Some(pos) = self.in_progress.iter().position(|k| k == key) {
            let mut path = self.in_progress[pos..].to_vec();
            path.push(key.clone());
            return Err(ModelError::Cycle { path });
        }
        self.in_progress.push(key.clone());
        Ok(())
    }

    fn network_entries(&mut self, entries: &[NetworkEntry], scope: &Scope) -> Result<NetworkSet> {
        let mut literals: Vec<IpNet> = Vec::new();
        let mut set = NetworkSet::empty();
        for entry in entries {
            match entry {
                NetworkEntry::Network(net) => literals.push(*net),
                NetworkEntry::Book(name) => {
                    let nested = self.resolve_network(name, scope)?;
                    set = set.union(&nested);
                }
            }
        }
        Ok(set.union(&NetworkSet::from_networks(&literals)))
    }

    fn service_entries(&mut self, entries: &[ServiceEntry], scope: &Scope) -> Result<ServiceSet> {
        let mut literals = Vec::new();
        let mut set = ServiceSet::empty();
        for entry in entries {
            match entry {
                ServiceEntry::Ports { protocol, ports } => literals.push((*protocol, *ports)),
                ServiceEntry::Book(name) => {
                    let nested = self.resolve_service(name, scope)?;
                    set = set.union(&nested);
                }
            }
        }
        Ok(set.union(&ServiceSet::from_entries(literals)))
    }
}

fn unknown(name: &str, scope: &Scope) -> ModelError {
    ModelError::UnknownReference {
        name: name.to_string(),
        scope: scope.clone(),
    }
}

// ── Snapshot resolution ──────────────────────────────────────────

/// Knobs for [`resolve_snapshot`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Add vendor default books (`any`, `any-tcp`, ...) to the global scope.
    pub builtin_books: bool,
    /// Resolve devices on the rayon pool.
    pub parallel: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            builtin_books: true,
            parallel: true,
        }
    }
}

/// A device with every rule set and zone address book resolved.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub id: DeviceId,
    pub rule_sets: Vec<Arc<ResolvedRuleSet>>,
    /// Resolved `address_book` of each zone that declares one.
    pub zone_books: HashMap<String, Arc<NetworkSet>>,
}

/// A validated snapshot with every book resolved.
#[derive(Debug, Clone)]
pub struct ResolvedSnapshot {
    pub snapshot: Arc<Snapshot>,
    pub digest: String,
    pub books: BookTable,
    /// In snapshot device order.
    pub devices: Vec<ResolvedDevice>,
}

impl ResolvedSnapshot {
    pub fn device(&self, id: &DeviceId) -> Option<&ResolvedDevice> {
        self.devices.iter().find(|d| &d.id == id)
    }
}

/// Validate and fully resolve a snapshot.
///
/// Every book is resolved, referenced or not, so a cycle or dangling
/// reference anywhere aborts the load.
pub fn resolve_snapshot(snapshot: Snapshot, options: &ResolveOptions) -> Result<ResolvedSnapshot> {
    snapshot.validate()?;
    let digest = snapshot.digest()?;

    let catalog = BookCatalog::new(
        snapshot.network_books.clone(),
        snapshot.service_books.clone(),
        options.builtin_books,
    )?;

    let mut globals = BookResolver::new(&catalog);
    for book in catalog.network_books().iter().filter(|b| b.scope == Scope::Global) {
        globals.network_by_key(&book.key())?;
    }
    for book in catalog.service_books().iter().filter(|b| b.scope == Scope::Global) {
        globals.service_by_key(&book.key())?;
    }
    let mut table = globals.into_table();

    let per_device: Vec<(ResolvedDevice, BookTable)> = if options.parallel {
        snapshot
            .devices
            .par_iter()
            .map(|device| resolve_device(&catalog, &table, device))
            .collect::<Result<_>>()?
    } else {
        snapshot
            .devices
            .iter()
            .map(|device| resolve_device(&catalog, &table, device))
            .collect::<Result<_>>()?
    };

    let mut devices = Vec::with_capacity(per_device.len());
    for (device, books) in per_device {
        table.merge(books);
        devices.push(device);
    }

    tracing::info!(
        devices = devices.len(),
        network_books = table.network_count(),
        service_books = table.service_count(),
        digest = %digest,
        "Snapshot resolved"
    );

    Ok(ResolvedSnapshot {
        snapshot: Arc::new(snapshot),
        digest,
        books: table,
        devices,
    })
}

fn resolve_device(
    catalog: &BookCatalog,
    shared: &BookTable,
    device: &Device,
) -> Result<(ResolvedDevice, BookTable)> {
    let scope = Scope::Device(device.id.clone());
    let mut resolver = BookResolver::with_shared(catalog, shared);

    for book in catalog.network_books().iter().filter(|b| b.scope == scope) {
        resolver.network_by_key(&book.key())?;
    }
    for book in catalog.service_books().iter().filter(|b| b.scope == scope) {
        resolver.service_by_key(&book.key())?;
    }

    let any_network = Arc::new(NetworkSet::any());
    let any_service = Arc::new(ServiceSet::any());

    let mut rule_sets = Vec::with_capacity(device.rule_sets.len());
    for rule_set in &device.rule_sets {
        let resolved = resolve_rule_set(
            &mut resolver,
            &scope,
            &device.id,
            rule_set,
            &any_network,
            &any_service,
        )?;
        rule_sets.push(Arc::new(resolved));
    }

    let mut zone_books = HashMap::new();
    for zone in &device.zones {
        if let Some(book) = &zone.address_book {
            zone_books.insert(zone.name.clone(), resolver.resolve_network(book, &scope)?);
        }
    }

    tracing::debug!(device = %device.id, rule_sets = rule_sets.len(), "Device resolved");

    Ok((
        ResolvedDevice {
            id: device.id.clone(),
            rule_sets,
            zone_books,
        },
        resolver.into_table(),
    ))
}

fn resolve_rule_set(
    resolver: &mut BookResolver<'_>,
    scope: &Scope,
    device: &DeviceId,
    rule_set: &RuleSet,
    any_network: &Arc<NetworkSet>,
    any_service: &Arc<ServiceSet>,
) -> Result<ResolvedRuleSet> {
    let mut rules = Vec::with_capacity(rule_set.rules.len());

    // Disabled rules still resolve so their references are checked.
    for rule in &rule_set.rules {
        let source = match &rule.source_book {
            Some(name) => resolver.resolve_network(name, scope)?,
            None => Arc::clone(any_network),
        };
        let destination = match &rule.destination_book {
            Some(name) => resolver.resolve_network(name, scope)?,
            None => Arc::clone(any_network),
        };
        let mut services = match &rule.service_book {
            Some(name) => resolver.resolve_service(name, scope)?,
            None => Arc::clone(any_service),
        };
        if let Some(protocol) = rule.protocol {
            services = Arc::new(services.restrict_to(protocol));
        }
        if !rule.enabled {
            continue;
        }

        rules.push(ResolvedRule {
            index: rule.index,
            action: rule.action,
            source,
            destination,
            services,
            description: rule.description.clone(),
        });
    }

    Ok(ResolvedRuleSet {
        id: RuleSetId::of(device, rule_set),
        default_action: rule_set.default_action,
        rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::{NetworkBook, ServiceBook};
    use crate::rules::AclRule;
    use crate::snapshot::AclZone;
    use crate::types::{Action, Flow, PortRange, Protocol};

    fn make_net_book(name: &str, scope: Scope, entries: Vec<NetworkEntry>) -> NetworkBook {
        NetworkBook {
            name: name.to_string(),
            scope,
            entries,
            exclusions: vec![],
        }
    }

    fn lit(net: &str) -> NetworkEntry {
        NetworkEntry::Network(net.parse().unwrap())
    }

    fn reference(name: &str) -> NetworkEntry {
        NetworkEntry::Book(name.to_string())
    }

    fn make_catalog(books: Vec<NetworkBook>) -> BookCatalog {
        BookCatalog::new(books, vec![], false).unwrap()
    }

    #[test]
    fn test_nested_books_flatten() {
        let catalog = make_catalog(vec![
            make_net_book("web", Scope::Global, vec![lit("10.0.1.0/24")]),
            make_net_book("db", Scope::Global, vec![lit("10.0.2.0/24")]),
            make_net_book("servers", Scope::Global, vec![reference("web"), reference("db")]),
        ]);
        let mut resolver = BookResolver::new(&catalog);
        let set = resolver.resolve_network("servers", &Scope::Global).unwrap();
        let expected: Vec<IpNet> = vec![
            "10.0.1.0/24".parse().unwrap(),
            "10.0.2.0/24".parse().unwrap(),
        ];
        assert_eq!(set.to_networks(), expected);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let catalog = make_catalog(vec![
            make_net_book("a", Scope::Global, vec![lit("10.0.0.0/8"), reference("b")]),
            make_net_book("b", Scope::Global, vec![lit("172.16.0.0/12")]),
        ]);
        let mut resolver = BookResolver::new(&catalog);
        let first = resolver.resolve_network("a", &Scope::Global).unwrap();
        let second = resolver.resolve_network("a", &Scope::Global).unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_cycle_rejected() {
        let catalog = make_catalog(vec![
            make_net_book("a", Scope::Global, vec![lit("10.0.0.0/8"), reference("b")]),
            make_net_book("b", Scope::Global, vec![reference("a")]),
        ]);
        let mut resolver = BookResolver::new(&catalog);
        let err = resolver.resolve_network("a", &Scope::Global).unwrap_err();
        match err {
            ModelError::Cycle { path } => {
                let names: Vec<_> = path.iter().map(|k| k.name.as_str()).collect();
                assert_eq!(names, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        // Nothing partial was cached.
        assert_eq!(resolver.into_table().network_count(), 0);
    }

    #[test]
    fn test_self_reference_rejected() {
        let catalog = make_catalog(vec![make_net_book(
            "loop",
            Scope::Global,
            vec![reference("loop")],
        )]);
        let mut resolver = BookResolver::new(&catalog);
        assert!(matches!(
            resolver.resolve_network("loop", &Scope::Global),
            Err(ModelError::Cycle { .. })
        ));
    }

    #[test]
    fn test_unknown_reference() {
        let catalog = make_catalog(vec![make_net_book(
            "a",
            Scope::Global,
            vec![reference("missing")],
        )]);
        let mut resolver = BookResolver::new(&catalog);
        let err = resolver.resolve_network("a", &Scope::Global).unwrap_err();
        assert_eq!(
            err,
            ModelError::UnknownReference {
                name: "missing".to_string(),
                scope: Scope::Global
            }
        );
    }

    #[test]
    fn test_exclusion_subtraction() {
        let mut book = make_net_book("lan", Scope::Global, vec![lit("192.168.0.0/16")]);
        book.exclusions = vec![lit("192.168.5.0/24")];
        let catalog = make_catalog(vec![book]);
        let mut resolver = BookResolver::new(&catalog);
        let set = resolver.resolve_network("lan", &Scope::Global).unwrap();
        assert!(set.contains("192.168.1.1".parse().unwrap()));
        assert!(!set.contains("192.168.5.1".parse().unwrap()));
    }

    #[test]
    fn test_device_scope_falls_back_to_global() {
        let catalog = make_catalog(vec![
            make_net_book("corp", Scope::Global, vec![lit("10.0.0.0/8")]),
            make_net_book(
                "local",
                Scope::device("fw-a"),
                vec![reference("corp"), lit("192.0.2.0/24")],
            ),
        ]);
        let mut resolver = BookResolver::new(&catalog);
        let set = resolver.resolve_network("local", &Scope::device("fw-a")).unwrap();
        assert!(set.contains("10.9.9.9".parse().unwrap()));
        assert!(set.contains("192.0.2.10".parse().unwrap()));
    }

    #[test]
    fn test_service_book_with_exclusion() {
        let services = vec![ServiceBook {
            name: "high-tcp".to_string(),
            scope: Scope::Global,
            entries: vec![ServiceEntry::Ports {
                protocol: Some(Protocol::TCP),
                ports: PortRange::new(1024, 65535),
            }],
            exclusions: vec![ServiceEntry::Ports {
                protocol: Some(Protocol::TCP),
                ports: PortRange::new(3389, 3389),
            }],
        }];
        let catalog = BookCatalog::new(vec![], services, false).unwrap();
        let mut resolver = BookResolver::new(&catalog);
        let set = resolver.resolve_service("high-tcp", &Scope::Global).unwrap();
        assert!(set.contains(Protocol::TCP, 8080));
        assert!(!set.contains(Protocol::TCP, 3389));
        assert!(!set.contains(Protocol::UDP, 8080));
    }

    fn make_snapshot() -> Snapshot {
        let rule = AclRule {
            index: 10,
            action: Action::Permit,
            source_zone: None,
            source_book: Some("clients".to_string()),
            destination_zone: None,
            destination_book: Some("any".to_string()),
            service_book: Some("any".to_string()),
            protocol: Some(Protocol::TCP),
            enabled: true,
            description: Some("clients out".to_string()),
        };
        let mut disabled = rule.clone();
        disabled.index = 20;
        disabled.enabled = false;
        disabled.action = Action::Deny;

        Snapshot {
            tool_run_id: None,
            devices: vec![Device {
                id: DeviceId::new("fw-a"),
                interfaces: vec![],
                zones: vec![
                    AclZone {
                        name: "inside".to_string(),
                        interfaces: vec![],
                        address_book: Some("clients".to_string()),
                    },
                    AclZone {
                        name: "outside".to_string(),
                        interfaces: vec![],
                        address_book: None,
                    },
                ],
                rule_sets: vec![RuleSet {
                    name: None,
                    from_zone: "inside".to_string(),
                    to_zone: "outside".to_string(),
                    default_action: Action::Deny,
                    rules: vec![rule, disabled],
                }],
                routes: vec![],
                adjacencies: vec![],
            }],
            network_books: vec![make_net_book(
                "clients",
                Scope::device("fw-a"),
                vec![lit("10.1.0.0/16")],
            )],
            service_books: vec![],
        }
    }

    #[test]
    fn test_resolve_snapshot() {
        for parallel in [true, false] {
            let options = ResolveOptions {
                builtin_books: true,
                parallel,
            };
            let resolved = resolve_snapshot(make_snapshot(), &options).unwrap();
            let device = resolved.device(&DeviceId::new("fw-a")).unwrap();
            let rule_set = &device.rule_sets[0];

            // Disabled rule dropped; protocol override applied.
            assert_eq!(rule_set.rules.len(), 1);
            assert!(rule_set.rules[0].services.contains(Protocol::TCP, 22));
            assert!(!rule_set.rules[0].services.contains(Protocol::UDP, 22));

            let flow = Flow {
                source: "10.1.2.3".parse().unwrap(),
                destination: "203.0.113.9".parse().unwrap(),
                protocol: Protocol::TCP,
                port: Some(443),
            };
            assert_eq!(rule_set.evaluate(&flow), (Action::Permit, Some(10)));

            assert!(device.zone_books["inside"].contains("10.1.0.1".parse().unwrap()));
            assert!(resolved
                .books
                .network(&BookKey::new(Scope::device("fw-a"), "clients"))
                .is_some());
            assert!(resolved.books.network(&BookKey::new(Scope::Global, "any")).is_some());
        }
    }

    #[test]
    fn test_resolve_snapshot_without_builtins_fails_on_any() {
        let options = ResolveOptions {
            builtin_books: false,
            parallel: false,
        };
        let err = resolve_snapshot(make_snapshot(), &options).unwrap_err();
        assert!(matches!(err, ModelError::UnknownReference { ref name, .. } if name == "any"));
    }

    #[test]
    fn test_disabled_rule_with_dangling_reference_fails_load() {
        let mut snapshot = make_snapshot();
        snapshot.devices[0].rule_sets[0].rules[1].source_book = Some("no-such-book".to_string());
        let err = resolve_snapshot(snapshot, &ResolveOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ModelError::UnknownReference {
                name: "no-such-book".to_string(),
                scope: Scope::device("fw-a"),
            }
        );
    }

    #[test]
    fn test_unreferenced_cycle_fails_load() {
        let mut snapshot = make_snapshot();
        snapshot.network_books.push(make_net_book("x", Scope::Global, vec![reference("y")]));
        snapshot.network_books.push(make_net_book("y", Scope::Global, vec![reference("x")]));
        let err = resolve_snapshot(snapshot, &ResolveOptions::default()).unwrap_err();
        assert!(matches!(err, ModelError::Cycle { .. }));
    }
}
