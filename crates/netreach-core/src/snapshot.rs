//! The in-memory snapshot handed to the core by the datastore loader.
//!
//! A snapshot is immutable for the duration of an analysis run. It is
//! validated once, before resolution, against every structural invariant
//! the resolver and graph builder rely on.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::books::{NetworkBook, ServiceBook, ServiceEntry};
use crate::error::{ModelError, Result};
use crate::rules::{RuleSet, RuleSetId};
use crate::types::{DeviceId, Scope};

/// A device interface and the addresses configured on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interface {
    pub name: String,
    /// Host address with prefix, e.g. `10.0.1.1/24`.
    #[serde(default)]
    pub addresses: Vec<IpNet>,
}

/// A logical traffic boundary on a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AclZone {
    pub name: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Network book describing addresses behind the zone beyond its
    /// directly connected subnets.
    #[serde(default)]
    pub address_book: Option<String>,
}

/// A configured route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub destination: IpNet,
    #[serde(default)]
    pub next_hop: Option<IpAddr>,
    /// Egress interface, when the configuration names one.
    #[serde(default)]
    pub interface: Option<String>,
}

/// A known link from one of this device's zones to a zone on another device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Adjacency {
    pub zone: String,
    pub peer_device: DeviceId,
    pub peer_zone: String,
    #[serde(default = "default_true")]
    pub bidirectional: bool,
}

fn default_true() -> bool {
    true
}

/// Everything the core knows about one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub zones: Vec<AclZone>,
    #[serde(default)]
    pub rule_sets: Vec<RuleSet>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub adjacencies: Vec<Adjacency>,
}

impl Device {
    pub fn zone(&self, name: &str) -> Option<&AclZone> {
        self.zones.iter().find(|z| z.name == name)
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// The zone an interface belongs to, if any.
    pub fn zone_of_interface(&self, interface: &str) -> Option<&AclZone> {
        self.zones
            .iter()
            .find(|z| z.interfaces.iter().any(|i| i == interface))
    }
}

/// One loaded tool run: devices plus every book they may reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub tool_run_id: Option<Uuid>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub network_books: Vec<NetworkBook>,
    #[serde(default)]
    pub service_books: Vec<ServiceBook>,
}

impl Snapshot {
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// BLAKE3 hash (hex) of the canonical JSON encoding.
    ///
    /// Verdicts carry this digest so a result can be tied to its exact input.
    pub fn digest(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    /// Check the structural invariants that do not need book resolution.
    ///
    /// Book uniqueness and reference validity are checked by the catalog and
    /// resolver; zone references from rule sets by the graph builder.
    pub fn validate(&self) -> Result<()> {
        let mut device_ids = HashSet::new();
        for device in &self.devices {
            if !device_ids.insert(&device.id) {
                return Err(ModelError::DuplicateDevice {
                    device: device.id.clone(),
                });
            }
            validate_device(device)?;
        }

        for book in &self.network_books {
            check_scope(&book.scope, &book.name, &device_ids)?;
        }
        for book in &self.service_books {
            check_scope(&book.scope, &book.name, &device_ids)?;
            for entry in book.entries.iter().chain(&book.exclusions) {
                if let ServiceEntry::Ports { ports, .. } = entry {
                    if !ports.is_valid() {
                        return Err(ModelError::InvalidPortRange {
                            book: book.name.clone(),
                            lo: ports.lo,
                            hi: ports.hi,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

fn check_scope(scope: &Scope, name: &str, devices: &HashSet<&DeviceId>) -> Result<()> {
    match scope {
        Scope::Device(id) if !devices.contains(id) => Err(ModelError::UnknownDevice {
            device: id.clone(),
            name: name.to_string(),
        }),
        _ => Ok(()),
    }
}

fn validate_device(device: &Device) -> Result<()> {
    let mut zones = HashSet::new();
    for zone in &device.zones {
        if !zones.insert(zone.name.as_str()) {
            return Err(ModelError::DuplicateZone {
                device: device.id.clone(),
                zone: zone.name.clone(),
            });
        }
    }

    let mut directions = HashSet::new();
    for rule_set in &device.rule_sets {
        if !directions.insert((rule_set.from_zone.as_str(), rule_set.to_zone.as_str())) {
            return Err(ModelError::DuplicateRuleSet {
                device: device.id.clone(),
                from_zone: rule_set.from_zone.clone(),
                to_zone: rule_set.to_zone.clone(),
            });
        }

        let id = RuleSetId::of(&device.id, rule_set).to_string();
        let mut previous: Option<u32> = None;
        for rule in &rule_set.rules {
            if let Some(prev) = previous {
                if rule.index <= prev {
                    return Err(ModelError::RuleIndexOrder {
                        rule_set: id,
                        previous: prev,
                        index: rule.index,
                    });
                }
            }
            previous = Some(rule.index);

            let zone_checks = [
                (&rule.source_zone, &rule_set.from_zone),
                (&rule.destination_zone, &rule_set.to_zone),
            ];
            for (named, expected) in zone_checks {
                if let Some(zone) = named {
                    if zone != expected {
                        return Err(ModelError::RuleZoneMismatch {
                            rule_set: id,
                            index: rule.index,
                            zone: zone.clone(),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::AclRule;
    use crate::types::{Action, PortRange};

    fn make_rule(index: u32) -> AclRule {
        AclRule {
            index,
            action: Action::Permit,
            source_zone: None,
            source_book: None,
            destination_zone: None,
            destination_book: None,
            service_book: None,
            protocol: None,
            enabled: true,
            description: None,
        }
    }

    fn make_device(id: &str, rules: Vec<AclRule>) -> Device {
        Device {
            id: DeviceId::new(id),
            interfaces: vec![],
            zones: vec![
                AclZone {
                    name: "inside".to_string(),
                    interfaces: vec![],
                    address_book: None,
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
                rules,
            }],
            routes: vec![],
            adjacencies: vec![],
        }
    }

    #[test]
    fn test_valid_snapshot() {
        let snapshot = Snapshot {
            devices: vec![make_device("fw-a", vec![make_rule(1), make_rule(5)])],
            ..Default::default()
        };
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_rule_index_must_increase() {
        let snapshot = Snapshot {
            devices: vec![make_device("fw-a", vec![make_rule(3), make_rule(3)])],
            ..Default::default()
        };
        assert!(matches!(
            snapshot.validate(),
            Err(ModelError::RuleIndexOrder { index: 3, .. })
        ));
    }

    #[test]
    fn test_duplicate_zone_rejected() {
        let mut device = make_device("fw-a", vec![]);
        device.zones.push(device.zones[0].clone());
        let snapshot = Snapshot {
            devices: vec![device],
            ..Default::default()
        };
        assert!(matches!(
            snapshot.validate(),
            Err(ModelError::DuplicateZone { .. })
        ));
    }

    #[test]
    fn test_rule_zone_mismatch() {
        let mut rule = make_rule(0);
        rule.source_zone = Some("dmz".to_string());
        let snapshot = Snapshot {
            devices: vec![make_device("fw-a", vec![rule])],
            ..Default::default()
        };
        assert!(matches!(
            snapshot.validate(),
            Err(ModelError::RuleZoneMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_port_range() {
        let snapshot = Snapshot {
            service_books: vec![ServiceBook {
                name: "broken".to_string(),
                scope: Scope::Global,
                entries: vec![ServiceEntry::Ports {
                    protocol: None,
                    ports: PortRange::new(100, 10),
                }],
                exclusions: vec![],
            }],
            ..Default::default()
        };
        assert!(matches!(
            snapshot.validate(),
            Err(ModelError::InvalidPortRange { lo: 100, hi: 10, .. })
        ));
    }

    #[test]
    fn test_book_scoped_to_unknown_device() {
        let snapshot = Snapshot {
            network_books: vec![NetworkBook {
                name: "web".to_string(),
                scope: Scope::device("ghost"),
                entries: vec![],
                exclusions: vec![],
            }],
            ..Default::default()
        };
        assert!(matches!(
            snapshot.validate(),
            Err(ModelError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn test_digest_is_stable() {
        let snapshot = Snapshot {
            devices: vec![make_device("fw-a", vec![make_rule(0)])],
            ..Default::default()
        };
        let a = snapshot.digest().unwrap();
        let b = snapshot.clone().digest().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other = Snapshot {
            devices: vec![make_device("fw-b", vec![make_rule(0)])],
            ..Default::default()
        };
        assert_ne!(a, other.digest().unwrap());
    }
}
