//! Resolved address and service sets.
//!
//! These are the flattened, exclusion-applied outputs of book resolution.
//! Both are built on [`IntervalSet`], so they are always in minimal form.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Subnets, Ipv6Subnets};
use serde::Serialize;

use crate::ranges::IntervalSet;
use crate::types::{PortRange, Protocol};

pub type PortSet = IntervalSet<u16>;

// ── Networks ──────────────────────────────────────────────────────

/// A set of IPv4 and IPv6 addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "Vec<IpNet>")]
pub struct NetworkSet {
    v4: IntervalSet<u32>,
    v6: IntervalSet<u128>,
}

impl NetworkSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every IPv4 and IPv6 address.
    pub fn any() -> Self {
        Self {
            v4: IntervalSet::full(),
            v6: IntervalSet::full(),
        }
    }

    pub fn from_networks<'a>(nets: impl IntoIterator<Item = &'a IpNet>) -> Self {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for net in nets {
            match net {
                IpNet::V4(n) => v4.push((u32::from(n.network()), u32::from(n.broadcast()))),
                IpNet::V6(n) => v6.push((u128::from(n.network()), u128::from(n.broadcast()))),
            }
        }
        Self {
            v4: IntervalSet::from_ranges(v4),
            v6: IntervalSet::from_ranges(v6),
        }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => self.v4.contains(u32::from(a)),
            IpAddr::V6(a) => self.v6.contains(u128::from(a)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    pub fn is_any(&self) -> bool {
        self.v4.is_full() && self.v6.is_full()
    }

    /// Number of ranges across both address families.
    pub fn range_count(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            v4: self.v4.union(&other.v4),
            v6: self.v6.union(&other.v6),
        }
    }

    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            v4: self.v4.intersect(&other.v4),
            v6: self.v6.intersect(&other.v6),
        }
    }

    pub fn subtract(&self, other: &Self) -> Self {
        Self {
            v4: self.v4.subtract(&other.v4),
            v6: self.v6.subtract(&other.v6),
        }
    }

    /// The minimal list of CIDR blocks covering exactly this set.
    pub fn to_networks(&self) -> Vec<IpNet> {
        let v4 = self.v4.iter().flat_map(|(lo, hi)| {
            Ipv4Subnets::new(Ipv4Addr::from(lo), Ipv4Addr::from(hi), 0).map(IpNet::V4)
        });
        let v6 = self.v6.iter().flat_map(|(lo, hi)| {
            Ipv6Subnets::new(Ipv6Addr::from(lo), Ipv6Addr::from(hi), 0).map(IpNet::V6)
        });
        v4.chain(v6).collect()
    }
}

impl From<NetworkSet> for Vec<IpNet> {
    fn from(value: NetworkSet) -> Self {
        value.to_networks()
    }
}

// ── Services ──────────────────────────────────────────────────────

/// A set of (protocol, destination port) pairs.
///
/// `protocols` holds the complete port set for each protocol that differs
/// from `other`, which applies to every protocol not listed. A TCP range and
/// a UDP range therefore never merge, while "any protocol" stays exact under
/// subtraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "BTreeMap<String, Vec<String>>")]
pub struct ServiceSet {
    other: PortSet,
    protocols: BTreeMap<Protocol, PortSet>,
}

impl ServiceSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every port of every protocol.
    pub fn any() -> Self {
        Self {
            other: PortSet::full(),
            protocols: BTreeMap::new(),
        }
    }

    /// Ports of a single protocol.
    pub fn protocol(protocol: Protocol, ports: PortSet) -> Self {
        let mut protocols = BTreeMap::new();
        if !ports.is_empty() {
            protocols.insert(protocol, ports);
        }
        Self {
            other: PortSet::empty(),
            protocols,
        }
    }

    /// The offered set for a flow: one port, or every port when unspecified.
    pub fn for_flow(protocol: Protocol, port: Option<u16>) -> Self {
        let ports = match port {
            Some(p) => PortSet::single(p),
            None => PortSet::full(),
        };
        Self::protocol(protocol, ports)
    }

    /// Build from `(protocol, range)` pairs; `None` protocol means every protocol.
    pub fn from_entries(entries: impl IntoIterator<Item = (Option<Protocol>, PortRange)>) -> Self {
        let mut other = Vec::new();
        let mut by_proto: BTreeMap<Protocol, Vec<(u16, u16)>> = BTreeMap::new();
        for (protocol, range) in entries {
            match protocol {
                None => other.push((range.lo, range.hi)),
                Some(p) => by_proto.entry(p).or_default().push((range.lo, range.hi)),
            }
        }

        let other = PortSet::from_ranges(other);
        let protocols = by_proto
            .into_iter()
            .map(|(p, ranges)| (p, PortSet::from_ranges(ranges).union(&other)))
            .collect();

        Self { other, protocols }.canonical()
    }

    /// The ports this set allows for `protocol`.
    pub fn ports_for(&self, protocol: Protocol) -> &PortSet {
        self.protocols.get(&protocol).unwrap_or(&self.other)
    }

    pub fn contains(&self, protocol: Protocol, port: u16) -> bool {
        self.ports_for(protocol).contains(port)
    }

    pub fn is_empty(&self) -> bool {
        self.other.is_empty() && self.protocols.is_empty()
    }

    pub fn is_any(&self) -> bool {
        self.other.is_full() && self.protocols.is_empty()
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.other.is_subset(&other.other)
            && self
                .keys_with(other)
                .all(|p| self.ports_for(p).is_subset(other.ports_for(p)))
    }

    pub fn union(&self, other: &Self) -> Self {
        self.combine(other, PortSet::union)
    }

    pub fn intersect(&self, other: &Self) -> Self {
        self.combine(other, PortSet::intersect)
    }

    pub fn subtract(&self, other: &Self) -> Self {
        self.combine(other, PortSet::subtract)
    }

    /// Restrict to a single protocol.
    pub fn restrict_to(&self, protocol: Protocol) -> Self {
        Self::protocol(protocol, self.ports_for(protocol).clone())
    }

    /// Apply a pointwise port-set operation for every protocol.
    fn combine(&self, other: &Self, op: impl Fn(&PortSet, &PortSet) -> PortSet) -> Self {
        let rest = op(&self.other, &other.other);
        let protocols = self
            .keys_with(other)
            .map(|p| (p, op(self.ports_for(p), other.ports_for(p))))
            .collect();
        Self {
            other: rest,
            protocols,
        }
        .canonical()
    }

    fn keys_with<'a>(&'a self, other: &'a Self) -> impl Iterator<Item = Protocol> + 'a {
        self.protocols
            .keys()
            .chain(other.protocols.keys())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
    }

    /// Drop per-protocol entries equal to the catch-all.
    fn canonical(mut self) -> Self {
        let other = &self.other;
        self.protocols.retain(|_, ports| ports != other);
        self
    }
}

impl From<ServiceSet> for BTreeMap<String, Vec<String>> {
    fn from(value: ServiceSet) -> Self {
        let mut out = BTreeMap::new();
        if !value.other.is_empty() {
            out.insert("any".to_string(), format_ports(&value.other));
        }
        for (protocol, ports) in &value.protocols {
            out.insert(protocol.to_string(), format_ports(ports));
        }
        out
    }
}

/// Render a port set as `["22", "8000-8080"]`, or `["any"]` when complete.
pub fn format_ports(ports: &PortSet) -> Vec<String> {
    if ports.is_full() {
        return vec!["any".to_string()];
    }
    ports
        .iter()
        .map(|(lo, hi)| {
            if lo == hi {
                lo.to_string()
            } else {
                format!("{lo}-{hi}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_network_set_merges_adjacent_blocks() {
        let set = NetworkSet::from_networks(&[net("10.0.0.0/25"), net("10.0.0.128/25")]);
        assert_eq!(set.range_count(), 1);
        assert_eq!(set.to_networks(), vec![net("10.0.0.0/24")]);
    }

    #[test]
    fn test_network_set_exclusion() {
        let set = NetworkSet::from_networks(&[net("192.168.0.0/16")])
            .subtract(&NetworkSet::from_networks(&[net("192.168.5.0/24")]));
        assert!(set.contains(ip("192.168.1.1")));
        assert!(!set.contains(ip("192.168.5.1")));
        assert!(set.contains(ip("192.168.6.0")));
    }

    #[test]
    fn test_network_set_mixed_families() {
        let set = NetworkSet::from_networks(&[net("10.0.0.0/8"), net("2001:db8::/32")]);
        assert!(set.contains(ip("10.1.2.3")));
        assert!(set.contains(ip("2001:db8::1")));
        assert!(!set.contains(ip("2001:db9::1")));
        assert_eq!(set.to_networks().len(), 2);
    }

    #[test]
    fn test_network_any() {
        let any = NetworkSet::any();
        assert!(any.is_any());
        assert_eq!(any.to_networks(), vec![net("0.0.0.0/0"), net("::/0")]);
    }

    #[test]
    fn test_service_protocols_never_merge() {
        let set = ServiceSet::from_entries([
            (Some(Protocol::TCP), PortRange::new(80, 80)),
            (Some(Protocol::UDP), PortRange::new(81, 81)),
        ]);
        assert!(set.contains(Protocol::TCP, 80));
        assert!(!set.contains(Protocol::TCP, 81));
        assert!(set.contains(Protocol::UDP, 81));
        assert!(!set.contains(Protocol::UDP, 80));
    }

    #[test]
    fn test_service_any_minus_protocol() {
        let set = ServiceSet::any().subtract(&ServiceSet::protocol(
            Protocol::TCP,
            PortSet::single(22),
        ));
        assert!(!set.contains(Protocol::TCP, 22));
        assert!(set.contains(Protocol::TCP, 23));
        assert!(set.contains(Protocol::UDP, 22));
        assert!(set.contains(Protocol(47), 0));
    }

    #[test]
    fn test_service_intersect_with_any() {
        let https = ServiceSet::protocol(Protocol::TCP, PortSet::single(443));
        assert_eq!(ServiceSet::any().intersect(&https), https);
        assert!(https.is_subset(&ServiceSet::any()));
        assert!(!ServiceSet::any().is_subset(&https));
    }

    #[test]
    fn test_service_union_collapses_to_any() {
        let tcp = ServiceSet::protocol(Protocol::TCP, PortSet::full());
        let not_tcp = ServiceSet::any().subtract(&tcp);
        assert!(tcp.union(&not_tcp).is_any());
    }

    #[test]
    fn test_service_serialization() {
        let set = ServiceSet::from_entries([
            (Some(Protocol::TCP), PortRange::new(443, 443)),
            (Some(Protocol::TCP), PortRange::new(8000, 8080)),
            (Some(Protocol::UDP), PortRange::ALL),
        ]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"tcp": ["443", "8000-8080"], "udp": ["any"]})
        );
    }
}
