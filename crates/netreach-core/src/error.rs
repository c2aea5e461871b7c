use thiserror::Error;

use crate::types::{BookKey, DeviceId, Scope};

/// Load-time errors for the canonical object model.
///
/// Every variant is fatal to snapshot construction: a partially resolved
/// book could under- or over-approximate a security-relevant set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Book reference cycle: {}", format_path(.path))]
    Cycle { path: Vec<BookKey> },

    #[error("Unknown book reference '{name}' in scope {scope}")]
    UnknownReference { name: String, scope: Scope },

    #[error("Duplicate {kind} book '{name}' in scope {scope}")]
    DuplicateBook {
        kind: BookKind,
        name: String,
        scope: Scope,
    },

    #[error("Duplicate zone '{zone}' on device {device}")]
    DuplicateZone { device: DeviceId, zone: String },

    #[error("Duplicate rule set {from_zone} -> {to_zone} on device {device}")]
    DuplicateRuleSet {
        device: DeviceId,
        from_zone: String,
        to_zone: String,
    },

    #[error("Duplicate device id {device}")]
    DuplicateDevice { device: DeviceId },

    #[error("Book '{name}' is scoped to unknown device {device}")]
    UnknownDevice { device: DeviceId, name: String },

    #[error("Invalid port range {lo}-{hi} in service book '{book}'")]
    InvalidPortRange { book: String, lo: u16, hi: u16 },

    #[error("Rule index {index} does not follow {previous} in rule set {rule_set}")]
    RuleIndexOrder {
        rule_set: String,
        previous: u32,
        index: u32,
    },

    #[error("Rule {index} in rule set {rule_set} names zone '{zone}' outside the rule set")]
    RuleZoneMismatch {
        rule_set: String,
        index: u32,
        zone: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Which kind of book an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookKind {
    Network,
    Service,
}

impl std::fmt::Display for BookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::Service => f.write_str("service"),
        }
    }
}

fn format_path(path: &[BookKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, ModelError>;
