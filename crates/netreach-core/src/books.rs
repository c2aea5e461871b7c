//! Network and service books, and the name-indexed catalog that holds them.
//!
//! Books reference each other by name, so the reference structure is a graph
//! rather than a tree. The catalog stores every book once in an arena and
//! indexes it by [`BookKey`]; references are resolved by lookup, never by
//! pointer.

use std::collections::HashMap;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{BookKind, ModelError, Result};
use crate::types::{BookKey, PortRange, Protocol, Scope};

/// One entry in a network book: a literal network or another book's name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NetworkEntry {
    Network(IpNet),
    Book(String),
}

/// A named address object group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkBook {
    pub name: String,
    pub scope: Scope,
    #[serde(default)]
    pub entries: Vec<NetworkEntry>,
    #[serde(default)]
    pub exclusions: Vec<NetworkEntry>,
}

impl NetworkBook {
    pub fn key(&self) -> BookKey {
        BookKey::new(self.scope.clone(), &self.name)
    }
}

/// One entry in a service book.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceEntry {
    /// Destination ports of one protocol, or of every protocol when `protocol` is absent.
    Ports {
        #[serde(default)]
        protocol: Option<Protocol>,
        #[serde(default)]
        ports: PortRange,
    },
    Book(String),
}

/// A named protocol/port object group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceBook {
    pub name: String,
    pub scope: Scope,
    #[serde(default)]
    pub entries: Vec<ServiceEntry>,
    #[serde(default)]
    pub exclusions: Vec<ServiceEntry>,
}

impl ServiceBook {
    pub fn key(&self) -> BookKey {
        BookKey::new(self.scope.clone(), &self.name)
    }
}

/// Global books vendors define implicitly.
const BUILTIN_NETWORKS: &[(&str, &[&str])] = &[
    ("any", &["0.0.0.0/0", "::/0"]),
    ("any4", &["0.0.0.0/0"]),
    ("any-ipv4", &["0.0.0.0/0"]),
    ("any6", &["::/0"]),
    ("any-ipv6", &["::/0"]),
];

const BUILTIN_SERVICES: &[(&str, Option<Protocol>)] = &[
    ("any", None),
    ("any-tcp", Some(Protocol::TCP)),
    ("any-udp", Some(Protocol::UDP)),
];

fn builtin_network_books() -> Vec<NetworkBook> {
    BUILTIN_NETWORKS
        .iter()
        .map(|(name, nets)| NetworkBook {
            name: name.to_string(),
            scope: Scope::Global,
            entries: nets
                .iter()
                .filter_map(|n| n.parse().ok())
                .map(NetworkEntry::Network)
                .collect(),
            exclusions: Vec::new(),
        })
        .collect()
}

fn builtin_service_books() -> Vec<ServiceBook> {
    BUILTIN_SERVICES
        .iter()
        .map(|&(name, protocol)| ServiceBook {
            name: name.to_string(),
            scope: Scope::Global,
            entries: vec![ServiceEntry::Ports {
                protocol,
                ports: PortRange::ALL,
            }],
            exclusions: Vec::new(),
        })
        .collect()
}

/// Name-indexed arena of every book in a snapshot.
#[derive(Debug, Default)]
pub struct BookCatalog {
    networks: Vec<NetworkBook>,
    services: Vec<ServiceBook>,
    network_index: HashMap<BookKey, usize>,
    service_index: HashMap<BookKey, usize>,
}

impl BookCatalog {
    /// Index books, rejecting duplicate `(scope, name)` pairs.
    ///
    /// With `builtins`, the vendor default books are added to the global
    /// scope wherever the snapshot does not define a book of the same name.
    pub fn new(
        networks: Vec<NetworkBook>,
        services: Vec<ServiceBook>,
        builtins: bool,
    ) -> Result<Self> {
        let mut catalog = Self::default();

        for book in networks {
            let key = book.key();
            if catalog.network_index.contains_key(&key) {
                return Err(ModelError::DuplicateBook {
                    kind: BookKind::Network,
                    name: book.name,
                    scope: book.scope,
                });
            }
            catalog.network_index.insert(key, catalog.networks.len());
            catalog.networks.push(book);
        }

        for book in services {
            let key = book.key();
            if catalog.service_index.contains_key(&key) {
                return Err(ModelError::DuplicateBook {
                    kind: BookKind::Service,
                    name: book.name,
                    scope: book.scope,
                });
            }
            catalog.service_index.insert(key, catalog.services.len());
            catalog.services.push(book);
        }

        if builtins {
            for book in builtin_network_books() {
                let key = book.key();
                if !catalog.network_index.contains_key(&key) {
                    catalog.network_index.insert(key, catalog.networks.len());
                    catalog.networks.push(book);
                }
            }
            for book in builtin_service_books() {
                let key = book.key();
                if !catalog.service_index.contains_key(&key) {
                    catalog.service_index.insert(key, catalog.services.len());
                    catalog.services.push(book);
                }
            }
        }

        Ok(catalog)
    }

    pub fn network(&self, key: &BookKey) -> Option<&NetworkBook> {
        self.network_index.get(key).map(|&i| &self.networks[i])
    }

    pub fn service(&self, key: &BookKey) -> Option<&ServiceBook> {
        self.service_index.get(key).map(|&i| &self.services[i])
    }

    /// Find the key a network reference names, looking in `scope` then global.
    pub fn lookup_network(&self, name: &str, scope: &Scope) -> Option<BookKey> {
        lookup(&self.network_index, name, scope)
    }

    /// Find the key a service reference names, looking in `scope` then global.
    pub fn lookup_service(&self, name: &str, scope: &Scope) -> Option<BookKey> {
        lookup(&self.service_index, name, scope)
    }

    pub fn network_books(&self) -> &[NetworkBook] {
        &self.networks
    }

    pub fn service_books(&self) -> &[ServiceBook] {
        &self.services
    }
}

fn lookup(index: &HashMap<BookKey, usize>, name: &str, scope: &Scope) -> Option<BookKey> {
    let local = BookKey::new(scope.clone(), name);
    if index.contains_key(&local) {
        return Some(local);
    }
    if *scope != Scope::Global {
        let global = BookKey::new(Scope::Global, name);
        if index.contains_key(&global) {
            return Some(global);
        }
    }
    None
}
