//! Address and identity derivation module.
//!
//! Pure functions mapping a node's position in the fabric (tier, index,
//! VLAN slot) to its name, MAC, VLAN id and IP address, plus a registry
//! that checks those derivations stay injective within one build.

pub mod naming;
pub mod registry;
pub mod vlan;

// Re-export commonly used types
pub use naming::{
    host_name, mac, switch_name, HostIdentity, SwitchTier, VlanIdentity, MAX_MAC_SEQUENCE,
};
pub use registry::IdentityRegistry;
pub use vlan::{
    tree_host_address, InterfaceAddress, VlanGroup, VlanId, VlanPlan, MAX_ADDRESS_INDEX,
};
