//! VLAN plan and host address derivation.
//!
//! A [`VlanPlan`] is an ordered list of VLAN ids, each mapped to a
//! "group octet". Hosts are assigned VLANs round-robin by their index within
//! a leaf, and their address is `10.<group>.<leaf>.<host>/24`.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{FabricError, FabricResult};

/// Largest leaf or per-leaf host index that fits an address octet
pub const MAX_ADDRESS_INDEX: u32 = 254;

/// Prefix length of every VLAN host subnet
pub const VLAN_PREFIX_LEN: u8 = 24;

/// Prefix length of tree host addresses (Mininet's `10.0.0.0/8` base)
pub const TREE_PREFIX_LEN: u8 = 8;

/// IEEE 802.1Q VLAN id (1..=4094)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub fn new(id: u16) -> FabricResult<Self> {
        if (1..=4094).contains(&id) {
            Ok(VlanId(id))
        } else {
            Err(FabricError::invalid(format!("VLAN id {} outside 1..=4094", id)))
        }
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for VlanId {
    type Error = FabricError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> Self {
        vlan.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An IPv4 address together with its prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceAddress {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl Serialize for InterfaceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// One VLAN of a plan and the second address octet its hosts use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanGroup {
    pub id: VlanId,
    pub group: u8,
}

/// Ordered VLAN list with its group octets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VlanPlan {
    groups: Vec<VlanGroup>,
}

impl Default for VlanPlan {
    /// VLANs 100, 200, 300, 400 in groups 1, 2, 3, 4
    fn default() -> Self {
        let groups = [(100, 1), (200, 2), (300, 3), (400, 4)]
            .into_iter()
            .map(|(id, group)| VlanGroup { id: VlanId(id), group })
            .collect();
        VlanPlan { groups }
    }
}

impl VlanPlan {
    /// Build a plan, checking that ids and group octets are unique
    pub fn new(groups: Vec<VlanGroup>) -> FabricResult<Self> {
        let plan = VlanPlan { groups };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> FabricResult<()> {
        if self.groups.is_empty() {
            return Err(FabricError::invalid("VLAN plan cannot be empty"));
        }
        let mut ids = HashSet::new();
        let mut octets = HashSet::new();
        for entry in &self.groups {
            if !ids.insert(entry.id) {
                return Err(FabricError::invalid(format!("duplicate VLAN id {}", entry.id)));
            }
            if entry.group == 0 || entry.group == 255 {
                return Err(FabricError::invalid(format!(
                    "group octet {} of VLAN {} outside 1..=254",
                    entry.group, entry.id
                )));
            }
            if !octets.insert(entry.group) {
                return Err(FabricError::invalid(format!(
                    "group octet {} used by more than one VLAN",
                    entry.group
                )));
            }
        }
        Ok(())
    }

    pub fn vlans(&self) -> impl Iterator<Item = VlanId> + '_ {
        self.groups.iter().map(|g| g.id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// VLAN of the `host_index`-th host (1-based) of a leaf
    pub fn vlan_for_index(&self, host_index: u32) -> FabricResult<VlanId> {
        if host_index == 0 {
            return Err(FabricError::invalid("host indices are 1-based"));
        }
        if self.groups.is_empty() {
            return Err(FabricError::invalid("VLAN plan cannot be empty"));
        }
        let slot = (host_index as usize - 1) % self.groups.len();
        Ok(self.groups[slot].id)
    }

    /// Group octet configured for a VLAN
    pub fn group_for(&self, vlan: VlanId) -> FabricResult<u8> {
        self.groups
            .iter()
            .find(|g| g.id == vlan)
            .map(|g| g.group)
            .ok_or_else(|| FabricError::invalid(format!("VLAN {} has no group mapping", vlan)))
    }

    /// Address of a VLAN host: `10.<group>.<leaf>.<host>/24`
    pub fn ip_for(
        &self,
        vlan: VlanId,
        leaf_index: u32,
        host_index: u32,
    ) -> FabricResult<InterfaceAddress> {
        let leaf = address_octet("leaf index", leaf_index)?;
        let host = address_octet("host index", host_index)?;
        let group = self.group_for(vlan)?;
        Ok(InterfaceAddress {
            address: Ipv4Addr::new(10, group, leaf, host),
            prefix_len: VLAN_PREFIX_LEN,
        })
    }
}

fn address_octet(what: &str, index: u32) -> FabricResult<u8> {
    if index == 0 || index > MAX_ADDRESS_INDEX {
        return Err(FabricError::invalid(format!(
            "{} {} outside 1..={}",
            what, index, MAX_ADDRESS_INDEX
        )));
    }
    Ok(index as u8)
}

/// Address of the `sequence`-th tree host inside `10.0.0.0/8`
pub fn tree_host_address(sequence: u32) -> FabricResult<InterfaceAddress> {
    // The host part must stay clear of the network and broadcast addresses
    if sequence == 0 || sequence >= (1 << 24) - 1 {
        return Err(FabricError::invalid(format!(
            "tree host sequence {} does not fit 10.0.0.0/8",
            sequence
        )));
    }
    Ok(InterfaceAddress {
        address: Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 0)) + sequence),
        prefix_len: TREE_PREFIX_LEN,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    #[test]
    fn test_round_robin_depends_only_on_index_mod_len() {
        let plan = VlanPlan::default();
        let all: Vec<VlanId> = plan.vlans().collect();
        for h in 1..=40u32 {
            let v = plan.vlan_for_index(h).unwrap();
            assert!(all.contains(&v));
            assert_eq!(v, plan.vlan_for_index(h + 4).unwrap());
        }
        assert_eq!(plan.vlan_for_index(1).unwrap(), vlan(100));
        assert_eq!(plan.vlan_for_index(3).unwrap(), vlan(300));
        assert_eq!(plan.vlan_for_index(5).unwrap(), vlan(100));
        assert!(plan.vlan_for_index(0).is_err());
    }

    #[test]
    fn test_ip_for() {
        let plan = VlanPlan::default();
        let addr = plan.ip_for(vlan(300), 2, 3).unwrap();
        assert_eq!(addr.to_string(), "10.3.2.3/24");

        assert!(plan.ip_for(vlan(300), 0, 3).is_err());
        assert!(plan.ip_for(vlan(300), 255, 3).is_err());
        assert!(plan.ip_for(vlan(300), 2, 255).is_err());
        assert!(matches!(
            plan.ip_for(vlan(500), 1, 1),
            Err(FabricError::InvalidTopologyParameter(_))
        ));
    }

    #[test]
    fn test_plan_validation() {
        assert!(VlanPlan::new(vec![]).is_err());
        assert!(VlanPlan::new(vec![
            VlanGroup { id: vlan(10), group: 1 },
            VlanGroup { id: vlan(10), group: 2 },
        ])
        .is_err());
        assert!(VlanPlan::new(vec![
            VlanGroup { id: vlan(10), group: 1 },
            VlanGroup { id: vlan(20), group: 1 },
        ])
        .is_err());
        assert!(VlanPlan::new(vec![VlanGroup { id: vlan(10), group: 0 }]).is_err());
        assert!(VlanPlan::default().validate().is_ok());
    }

    #[test]
    fn test_vlan_id_bounds() {
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
        assert!(serde_yaml::from_str::<VlanId>("5000").is_err());
        assert_eq!(serde_yaml::from_str::<VlanId>("200").unwrap(), vlan(200));
    }

    #[test]
    fn test_tree_host_address() {
        assert_eq!(tree_host_address(1).unwrap().to_string(), "10.0.0.1/8");
        assert_eq!(tree_host_address(300).unwrap().to_string(), "10.0.1.44/8");
        assert!(tree_host_address(0).is_err());
    }
}
