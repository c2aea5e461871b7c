//! Error types for the netreach-graph crate.

use netreach_core::{DeviceId, ModelError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Zone {zone} is not declared on device {device}")]
    Topology { device: DeviceId, zone: String },

    #[error("Device {device} is referenced by the topology but not present in the snapshot")]
    UnknownDevice { device: DeviceId },
}

pub type Result<T> = std::result::Result<T, GraphError>;
