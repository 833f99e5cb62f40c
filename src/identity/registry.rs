//! Identity registry.
//!
//! Tracks every name, MAC and address handed out during one build so that
//! a collision (which would mean the derivation functions are not
//! injective for the given shape) is caught before the graph is returned.

use std::collections::{HashMap, HashSet};

use super::vlan::InterfaceAddress;
use crate::error::{FabricError, FabricResult};

/// Registry of identities assigned during one build
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    names: HashSet<String>,
    /// MAC -> owning host
    macs: HashMap<String, String>,
    /// Address -> owning host
    addresses: HashMap<InterfaceAddress, String>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node name, failing if it is already taken
    pub fn register_name(&mut self, name: &str) -> FabricResult<()> {
        if !self.names.insert(name.to_string()) {
            return Err(FabricError::invariant(format!("node name {} assigned twice", name)));
        }
        Ok(())
    }

    /// Register a host MAC
    pub fn register_mac(&mut self, mac: &str, host: &str) -> FabricResult<()> {
        if let Some(existing) = self.macs.get(mac) {
            return Err(FabricError::invariant(format!(
                "MAC {} already assigned to {}, cannot assign to {}",
                mac, existing, host
            )));
        }
        self.macs.insert(mac.to_string(), host.to_string());
        Ok(())
    }

    /// Register a host address
    pub fn register_address(
        &mut self,
        address: InterfaceAddress,
        host: &str,
    ) -> FabricResult<()> {
        if let Some(existing) = self.addresses.get(&address) {
            return Err(FabricError::invariant(format!(
                "address {} already assigned to {}, cannot assign to {}",
                address, existing, host
            )));
        }
        self.addresses.insert(address, host.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_collisions_are_invariant_violations() {
        let mut registry = IdentityRegistry::new();
        registry.register_name("s0").unwrap();
        assert!(matches!(
            registry.register_name("s0"),
            Err(FabricError::TopologyInvariantViolation(_))
        ));

        registry.register_mac("02:00:00:00:00:01", "host_1").unwrap();
        assert!(registry.register_mac("02:00:00:00:00:01", "host_2").is_err());

        let addr = InterfaceAddress { address: Ipv4Addr::new(10, 1, 1, 1), prefix_len: 24 };
        registry.register_address(addr, "h1_1_v100").unwrap();
        let err = registry.register_address(addr, "h2_1_v100").unwrap_err();
        assert!(err.to_string().contains("h1_1_v100"), "{}", err);
    }
}
