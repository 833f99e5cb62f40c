//! Error kinds shared by the builder, resolver and provisioner.
//!
//! Construction-time kinds (`InvalidTopologyParameter`,
//! `TopologyInvariantViolation`) abort a run before anything reaches the
//! substrate. The remaining kinds are recorded per host by the provisioner
//! and never abort the batch.

use std::time::Duration;

use serde::Serialize;

/// Errors produced by fabric construction and host provisioning
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FabricError {
    #[error("Invalid topology parameter: {0}")]
    InvalidTopologyParameter(String),

    #[error("Topology invariant violated: {0}")]
    TopologyInvariantViolation(String),

    #[error("Command `{command}` on {node} timed out after {}", human_duration(.timeout))]
    ProvisioningTimeout {
        node: String,
        command: String,
        timeout: Duration,
    },

    #[error("Command `{command}` on {node} failed with exit code {exit_code}: {output}")]
    ExternalCommandFailure {
        node: String,
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("No access switch found for host {host}")]
    PeerNotFound { host: String },

    #[error("Substrate error on {node}: {message}")]
    Substrate { node: String, message: String },
}

/// Stable, serializable name of an error kind, used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidTopologyParameter,
    TopologyInvariantViolation,
    ProvisioningTimeout,
    ExternalCommandFailure,
    PeerNotFound,
    Substrate,
}

impl FabricError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTopologyParameter(_) => ErrorKind::InvalidTopologyParameter,
            Self::TopologyInvariantViolation(_) => ErrorKind::TopologyInvariantViolation,
            Self::ProvisioningTimeout { .. } => ErrorKind::ProvisioningTimeout,
            Self::ExternalCommandFailure { .. } => ErrorKind::ExternalCommandFailure,
            Self::PeerNotFound { .. } => ErrorKind::PeerNotFound,
            Self::Substrate { .. } => ErrorKind::Substrate,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidTopologyParameter(message.into())
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::TopologyInvariantViolation(message.into())
    }
}

fn human_duration(duration: &Duration) -> String {
    humantime_serde::re::humantime::format_duration(*duration).to_string()
}

pub type FabricResult<T> = Result<T, FabricError>;
