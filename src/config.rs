use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::identity::{SwitchTier, VlanPlan};
use crate::provision::{ProvisionOptions, DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_WORKERS};
use crate::topology::{BuildOptions, ShapeParams};

/// Default OpenFlow controller port
pub const DEFAULT_CONTROLLER_PORT: u16 = 6653;

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

/// OVS protocol list, e.g. "OpenFlow13" or "OpenFlow10,OpenFlow13"
static PROTOCOLS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^OpenFlow1[0-5](,OpenFlow1[0-5])*$").expect("Invalid protocol regex")
});

/// Top-level configuration structure that mirrors the YAML fabric file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    /// Remote controller every switch is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerConfig>,
    #[serde(default)]
    pub switch: SwitchConfig,
    pub topology: ShapeParams,
    /// VLAN ids and their address group octets, in round-robin order
    #[serde(default)]
    pub vlans: VlanPlan,
}

/// General run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Bound on each external command (e.g., "3s", "500ms")
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Upper limit on hosts provisioned at once
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            command_timeout: default_command_timeout(),
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub ip: IpAddr,
    #[serde(default = "default_controller_port")]
    pub port: u16,
    /// Switch tiers attached to the controller; every switch when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiers: Option<Vec<SwitchTier>>,
}

fn default_controller_port() -> u16 {
    DEFAULT_CONTROLLER_PORT
}

impl ControllerConfig {
    /// OVS controller target, e.g. "tcp:127.0.0.1:6653"
    pub fn target(&self) -> String {
        format!("tcp:{}", SocketAddr::new(self.ip, self.port))
    }

    /// Whether switches of `tier` are attached
    pub fn attaches(&self, tier: SwitchTier) -> bool {
        self.tiers.as_ref().map_or(true, |tiers| tiers.contains(&tier))
    }
}

impl FromStr for ControllerConfig {
    type Err = String;

    /// Parse "IP:PORT" or a bare IP using the default port
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(ControllerConfig { ip: addr.ip(), port: addr.port(), tiers: None });
        }
        s.parse::<IpAddr>()
            .map(|ip| ControllerConfig { ip, port: DEFAULT_CONTROLLER_PORT, tiers: None })
            .map_err(|_| format!("invalid controller address '{}', expected IP:PORT", s))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Protocol versions forced on every bridge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl FabricConfig {
    /// Configuration for a shape with every other setting at its default
    pub fn from_shape(topology: ShapeParams) -> Self {
        FabricConfig {
            general: GeneralConfig::default(),
            controller: None,
            switch: SwitchConfig::default(),
            topology,
            vlans: VlanPlan::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(level) = &self.general.log_level {
            if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
                return Err(ValidationError::InvalidGeneral(format!(
                    "unknown log_level '{}', expected one of {}",
                    level,
                    LOG_LEVELS.join(", ")
                )));
            }
        }
        if self.general.command_timeout.is_zero() {
            return Err(ValidationError::InvalidGeneral(
                "command_timeout must be positive".to_string(),
            ));
        }
        if self.general.max_workers == 0 {
            return Err(ValidationError::InvalidGeneral(
                "max_workers must be at least 1".to_string(),
            ));
        }

        if let Some(controller) = &self.controller {
            if controller.port == 0 {
                return Err(ValidationError::InvalidController("port cannot be 0".to_string()));
            }
            self.validate_controller_tiers(controller)?;
        }

        if let Some(protocol) = &self.switch.protocol {
            if !PROTOCOLS.is_match(protocol) {
                return Err(ValidationError::InvalidSwitch(format!(
                    "unsupported protocol '{}', expected e.g. OpenFlow13",
                    protocol
                )));
            }
        }

        match &self.topology {
            ShapeParams::Tree(tree) if tree.fanout == 0 => {
                return Err(ValidationError::InvalidTopology(
                    "fanout must be at least 1".to_string(),
                ));
            }
            ShapeParams::Clos(clos) => {
                for (name, value) in [
                    ("spines", clos.spines),
                    ("leaves", clos.leaves),
                    ("hosts_per_leaf", clos.hosts_per_leaf),
                ] {
                    if value == 0 {
                        return Err(ValidationError::InvalidTopology(format!(
                            "{} must be at least 1",
                            name
                        )));
                    }
                }
            }
            ShapeParams::Tree(_) => {}
        }

        self.vlans
            .validate()
            .map_err(|e| ValidationError::InvalidVlans(e.to_string()))
    }

    /// Controller tiers must exist in the configured fabric
    fn validate_controller_tiers(
        &self,
        controller: &ControllerConfig,
    ) -> Result<(), ValidationError> {
        let Some(tiers) = &controller.tiers else {
            return Ok(());
        };
        if tiers.is_empty() {
            return Err(ValidationError::InvalidController(
                "tiers cannot be empty; omit it to attach every switch".to_string(),
            ));
        }
        let fabric_tiers: &[SwitchTier] = match self.topology {
            ShapeParams::Tree(_) => {
                &[SwitchTier::Root, SwitchTier::Aggregation, SwitchTier::Access]
            }
            ShapeParams::Clos(_) => &[SwitchTier::Spine, SwitchTier::Leaf],
        };
        match tiers.iter().find(|tier| !fabric_tiers.contains(tier)) {
            Some(tier) => Err(ValidationError::InvalidController(format!(
                "tier {:?} does not exist in a {:?} fabric",
                tier,
                self.topology.kind()
            ))),
            None => Ok(()),
        }
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            vlan_plan: self.vlans.clone(),
            protocol: self.switch.protocol.clone(),
        }
    }

    pub fn provision_options(&self) -> ProvisionOptions {
        ProvisionOptions {
            command_timeout: self.general.command_timeout,
            max_workers: self.general.max_workers,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid controller configuration: {0}")]
    InvalidController(String),
    #[error("Invalid switch configuration: {0}")]
    InvalidSwitch(String),
    #[error("Invalid topology configuration: {0}")]
    InvalidTopology(String),
    #[error("Invalid VLAN configuration: {0}")]
    InvalidVlans(String),
}
