//! Cross-device topology inference.
//!
//! Rule sets describe traffic between zones of the same device. Which zone
//! of one device leads to which zone of another is not stated by access
//! rules, so it is inferred here. Declared adjacencies always count; the
//! selected [`TopologyInference`] strategy decides what else does.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use ipnet::IpNet;
use netreach_core::{Device, DeviceId, ZoneRef};
use serde::{Deserialize, Serialize};

/// How transit links between devices are discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyInference {
    /// Declared adjacencies only.
    ExplicitOnly,
    /// Declared adjacencies plus zoned interfaces on different devices where
    /// either interface's subnet holds the other's address, linked both ways.
    #[default]
    SharedSubnet,
    /// Declared adjacencies plus routes whose next hop is another device's
    /// interface address, linked in the route's direction only.
    NextHop,
}

/// Why two zones were linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LinkReason {
    Declared,
    SharedSubnet { subnet: IpNet },
    NextHop { via: IpAddr },
}

/// A directed, unfiltered transit link between two zones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub from: ZoneRef,
    pub to: ZoneRef,
    pub reason: LinkReason,
}

impl TopologyInference {
    /// Infer transit links for `devices`.
    ///
    /// Output order is deterministic for a given input. When several
    /// sources produce the same `(from, to)` pair only the first is kept,
    /// with declared adjacencies taking precedence.
    pub fn infer(self, devices: &[Device]) -> Vec<Link> {
        let mut links = LinkSet::default();
        declared_links(devices, &mut links);
        match self {
            TopologyInference::ExplicitOnly => {}
            TopologyInference::SharedSubnet => shared_subnet_links(devices, &mut links),
            TopologyInference::NextHop => next_hop_links(devices, &mut links),
        }
        tracing::debug!(strategy = ?self, links = links.links.len(), "Topology inferred");
        links.links
    }
}

#[derive(Default)]
struct LinkSet {
    links: Vec<Link>,
    seen: HashSet<(ZoneRef, ZoneRef)>,
}

impl LinkSet {
    fn insert(&mut self, from: ZoneRef, to: ZoneRef, reason: LinkReason) {
        if from == to || !self.seen.insert((from.clone(), to.clone())) {
            return;
        }
        self.links.push(Link { from, to, reason });
    }
}

fn declared_links(devices: &[Device], links: &mut LinkSet) {
    for device in devices {
        for adjacency in &device.adjacencies {
            let local = ZoneRef {
                device: device.id.clone(),
                zone: adjacency.zone.clone(),
            };
            let peer = ZoneRef {
                device: adjacency.peer_device.clone(),
                zone: adjacency.peer_zone.clone(),
            };
            if adjacency.bidirectional {
                links.insert(peer.clone(), local.clone(), LinkReason::Declared);
            }
            links.insert(local, peer, LinkReason::Declared);
        }
    }
}

/// Interface addresses that belong to a zone, in declared zone order.
fn zoned_addresses(device: &Device) -> Vec<(ZoneRef, IpNet)> {
    let mut out = Vec::new();
    for zone in &device.zones {
        for name in &zone.interfaces {
            let Some(interface) = device.interface(name) else {
                tracing::warn!(
                    device = %device.id,
                    zone = %zone.name,
                    interface = %name,
                    "Zone lists an unknown interface"
                );
                continue;
            };
            for address in &interface.addresses {
                out.push((
                    ZoneRef {
                        device: device.id.clone(),
                        zone: zone.name.clone(),
                    },
                    *address,
                ));
            }
        }
    }
    out
}

fn shared_subnet_links(devices: &[Device], links: &mut LinkSet) {
    let mut segments: Vec<(ZoneRef, IpNet)> = Vec::new();
    for device in devices {
        for (zone, address) in zoned_addresses(device) {
            // Host routes and loopbacks do not form a shared segment.
            if address.prefix_len() == address.max_prefix_len() {
                continue;
            }
            segments.push((zone, address));
        }
    }

    for (i, (a_zone, a)) in segments.iter().enumerate() {
        for (b_zone, b) in &segments[i + 1..] {
            if a_zone.device == b_zone.device {
                continue;
            }
            if !a.trunc().contains(&b.addr()) && !b.trunc().contains(&a.addr()) {
                continue;
            }
            // Masks may differ across the segment; report the wider one.
            let subnet = if a.prefix_len() <= b.prefix_len() {
                a.trunc()
            } else {
                b.trunc()
            };
            links.insert(a_zone.clone(), b_zone.clone(), LinkReason::SharedSubnet { subnet });
            links.insert(b_zone.clone(), a_zone.clone(), LinkReason::SharedSubnet { subnet });
        }
    }
}

fn next_hop_links(devices: &[Device], links: &mut LinkSet) {
    let mut owners: HashMap<IpAddr, ZoneRef> = HashMap::new();
    for device in devices {
        for (zone, address) in zoned_addresses(device) {
            owners.entry(address.addr()).or_insert(zone);
        }
    }

    for device in devices {
        let local = zoned_addresses(device);
        for route in &device.routes {
            let Some(via) = route.next_hop else {
                continue;
            };
            let egress = match &route.interface {
                Some(name) => device.zone_of_interface(name).map(|z| ZoneRef {
                    device: device.id.clone(),
                    zone: z.name.clone(),
                }),
                None => local
                    .iter()
                    .find(|(_, address)| address.contains(&via))
                    .map(|(zone, _)| zone.clone()),
            };
            let Some(egress) = egress else {
                tracing::warn!(
                    device = %device.id,
                    route = %route.destination,
                    next_hop = %via,
                    "Cannot place route egress in a zone"
                );
                continue;
            };
            match owners.get(&via) {
                Some(peer) if peer.device != device.id => {
                    links.insert(egress, peer.clone(), LinkReason::NextHop { via });
                }
                Some(_) => {}
                None => {
                    tracing::debug!(
                        device = %device.id,
                        next_hop = %via,
                        "Next hop not owned by any known device"
                    );
                }
            }
        }
    }
}

/// Devices named by links that are not in `devices`.
pub(crate) fn unknown_devices<'a>(links: &'a [Link], devices: &[Device]) -> Vec<&'a DeviceId> {
    let known: HashSet<&DeviceId> = devices.iter().map(|d| &d.id).collect();
    let mut missing = Vec::new();
    for link in links {
        for id in [&link.from.device, &link.to.device] {
            if !known.contains(id) && !missing.contains(&id) {
                missing.push(id);
            }
        }
    }
    missing
}
