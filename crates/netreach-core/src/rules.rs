//! Ordered access rules and their first-match evaluation.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sets::{NetworkSet, ServiceSet};
use crate::types::{Action, DeviceId, Flow, Protocol};

// ── Canonical (unresolved) rules ─────────────────────────────────

/// A single permit/deny line as produced by a vendor parser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AclRule {
    /// Evaluation order within the owning rule set.
    pub index: u32,
    pub action: Action,
    #[serde(default)]
    pub source_zone: Option<String>,
    /// Source network book; absent means any address.
    #[serde(default)]
    pub source_book: Option<String>,
    #[serde(default)]
    pub destination_zone: Option<String>,
    #[serde(default)]
    pub destination_book: Option<String>,
    /// Service book; absent means any protocol and port.
    #[serde(default)]
    pub service_book: Option<String>,
    /// When set, the rule only matches flows of exactly this protocol.
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Ordered rules governing traffic from one zone to another on one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    #[serde(default)]
    pub name: Option<String>,
    pub from_zone: String,
    pub to_zone: String,
    pub default_action: Action,
    #[serde(default)]
    pub rules: Vec<AclRule>,
}

/// Identity of a rule set: device plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RuleSetId {
    pub device: DeviceId,
    pub from_zone: String,
    pub to_zone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RuleSetId {
    pub fn of(device: &DeviceId, rule_set: &RuleSet) -> Self {
        Self {
            device: device.clone(),
            from_zone: rule_set.from_zone.clone(),
            to_zone: rule_set.to_zone.clone(),
            name: rule_set.name.clone(),
        }
    }
}

impl fmt::Display for RuleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.device, self.from_zone, self.to_zone)?;
        if let Some(name) = &self.name {
            write!(f, " ({name})")?;
        }
        Ok(())
    }
}

// ── Resolved rules ───────────────────────────────────────────────

/// A rule whose book references have been expanded to concrete sets.
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    pub index: u32,
    pub action: Action,
    pub source: Arc<NetworkSet>,
    pub destination: Arc<NetworkSet>,
    /// Services with any protocol override already applied.
    pub services: Arc<ServiceSet>,
    pub description: Option<String>,
}

impl ResolvedRule {
    fn matches_addresses(&self, source: IpAddr, destination: IpAddr) -> bool {
        self.source.contains(source) && self.destination.contains(destination)
    }

    /// Whether the whole flow falls inside this rule.
    pub fn matches(&self, flow: &Flow) -> bool {
        if !self.matches_addresses(flow.source, flow.destination) {
            return false;
        }
        let ports = self.services.ports_for(flow.protocol);
        match flow.port {
            Some(port) => ports.contains(port),
            None => ports.is_full(),
        }
    }
}

/// The part of an offered service set claimed by one rule or the default.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleHit {
    /// `None` when the rule set's default action claimed the services.
    pub rule: Option<u32>,
    pub action: Action,
    pub services: ServiceSet,
}

/// The outcome of evaluating a rule set against an offered service set.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub permitted: ServiceSet,
    /// Claims in evaluation order; together they cover the offered set.
    pub hits: Vec<RuleHit>,
}

impl Evaluation {
    /// The claim that best explains the outcome: the first permit when
    /// anything passed, otherwise the first claim.
    pub fn deciding_hit(&self) -> Option<&RuleHit> {
        if self.permitted.is_empty() {
            self.hits.first()
        } else {
            self.hits.iter().find(|h| h.action == Action::Permit)
        }
    }
}

/// A rule set with every rule resolved, ready for evaluation.
#[derive(Debug, Clone)]
pub struct ResolvedRuleSet {
    pub id: RuleSetId,
    pub default_action: Action,
    /// Enabled rules in ascending index order.
    pub rules: Vec<ResolvedRule>,
}

impl ResolvedRuleSet {
    /// First-match evaluation of a single flow.
    ///
    /// Returns the action and the index of the matching rule, or the default
    /// action and `None` when no rule matched.
    pub fn evaluate(&self, flow: &Flow) -> (Action, Option<u32>) {
        self.rules
            .iter()
            .find(|rule| rule.matches(flow))
            .map(|rule| (rule.action, Some(rule.index)))
            .unwrap_or((self.default_action, None))
    }

    /// First-match evaluation generalized to a set of services.
    ///
    /// Walking rules in index order, each address-matching rule claims the
    /// part of `offered` no earlier rule claimed. The default action claims
    /// whatever remains. For a single (protocol, port) this agrees with
    /// [`ResolvedRuleSet::evaluate`].
    pub fn evaluate_services(
        &self,
        source: IpAddr,
        destination: IpAddr,
        offered: &ServiceSet,
    ) -> Evaluation {
        let mut remaining = offered.clone();
        let mut permitted = ServiceSet::empty();
        let mut hits = Vec::new();

        for rule in &self.rules {
            if remaining.is_empty() {
                break;
            }
            if !rule.matches_addresses(source, destination) {
                continue;
            }
            let claimed = remaining.intersect(&rule.services);
            if claimed.is_empty() {
                continue;
            }
            remaining = remaining.subtract(&claimed);
            if rule.action == Action::Permit {
                permitted = permitted.union(&claimed);
            }
            hits.push(RuleHit {
                rule: Some(rule.index),
                action: rule.action,
                services: claimed,
            });
        }

        if !remaining.is_empty() {
            if self.default_action == Action::Permit {
                permitted = permitted.union(&remaining);
            }
            hits.push(RuleHit {
                rule: None,
                action: self.default_action,
                services: remaining,
            });
        }

        Evaluation { permitted, hits }
    }

    /// Upper bound on the services any flow could get through this rule set.
    ///
    /// Rules covering every source and destination consume services for all
    /// flows; address-restricted permits can only add to the bound.
    pub fn service_envelope(&self) -> ServiceSet {
        let mut remaining = ServiceSet::any();
        let mut envelope = ServiceSet::empty();

        for rule in &self.rules {
            let claimed = remaining.intersect(&rule.services);
            if rule.action == Action::Permit {
                envelope = envelope.union(&claimed);
            }
            if rule.source.is_any() && rule.destination.is_any() {
                remaining = remaining.subtract(&claimed);
            }
        }

        if self.default_action == Action::Permit {
            envelope = envelope.union(&remaining);
        }
        envelope
    }
}
