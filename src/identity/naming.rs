//! Node naming and MAC derivation.
//!
//! Every name and MAC in a fabric is a pure function of a node's position.
//! Host names are always computed from an explicit [`HostIdentity`] record
//! and never parsed back into indices.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::vlan::VlanId;
use crate::error::{FabricError, FabricResult};

/// Highest MAC sequence number that fits four decimal digits
pub const MAX_MAC_SEQUENCE: u32 = 9999;

/// Position of a switch within its fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchTier {
    /// Tree root (tier 1)
    Root,
    /// Tree aggregation layer (tier 2)
    Aggregation,
    /// Tree access layer (tier 3)
    Access,
    /// Clos spine (tier 1)
    Spine,
    /// Clos leaf (tier 2)
    Leaf,
}

impl FromStr for SwitchTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "root" => Ok(Self::Root),
            "aggregation" => Ok(Self::Aggregation),
            "access" => Ok(Self::Access),
            "spine" => Ok(Self::Spine),
            "leaf" => Ok(Self::Leaf),
            other => Err(format!(
                "unknown switch tier '{}', expected root, aggregation, access, spine or leaf",
                other
            )),
        }
    }
}

/// Name of the `index`-th switch (1-based) of a tier
///
/// Access switch indices are fabric-global, so the names stay unique across
/// aggregation subtrees.
///
/// # Examples
/// ```
/// use fabricsim::identity::{switch_name, SwitchTier};
///
/// assert_eq!(switch_name(SwitchTier::Root, 1).unwrap(), "s0");
/// assert_eq!(switch_name(SwitchTier::Access, 4).unwrap(), "s3_4");
/// assert_eq!(switch_name(SwitchTier::Leaf, 2).unwrap(), "l2");
/// ```
pub fn switch_name(tier: SwitchTier, index: u32) -> FabricResult<String> {
    if index == 0 {
        return Err(FabricError::invalid(format!(
            "switch index must be positive (tier {:?})",
            tier
        )));
    }
    let name = match tier {
        SwitchTier::Root if index == 1 => "s0".to_string(),
        SwitchTier::Root => {
            return Err(FabricError::invalid(format!(
                "a tree has a single root switch, got index {}",
                index
            )))
        }
        SwitchTier::Aggregation => format!("s2_{}", index),
        SwitchTier::Access => format!("s3_{}", index),
        SwitchTier::Spine => format!("s{}", index),
        SwitchTier::Leaf => format!("l{}", index),
    };
    Ok(name)
}

/// Structured identity of a VLAN-segmented host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VlanIdentity {
    /// 1-based index of the leaf the host hangs off
    pub leaf_index: u32,
    /// 1-based index of the host within its leaf
    pub host_index: u32,
    pub vlan: VlanId,
}

/// Identity a host is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostIdentity {
    /// Tree host, numbered by creation order
    Tree { sequence: u32 },
    /// Spine-leaf host with a VLAN
    Vlan(VlanIdentity),
}

impl HostIdentity {
    pub fn vlan(&self) -> Option<&VlanIdentity> {
        match self {
            Self::Vlan(identity) => Some(identity),
            Self::Tree { .. } => None,
        }
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tree { sequence } => write!(f, "host_{}", sequence),
            Self::Vlan(id) => write!(f, "h{}_{}_v{}", id.leaf_index, id.host_index, id.vlan),
        }
    }
}

/// Display name of a host
///
/// # Examples
/// ```
/// use fabricsim::identity::{host_name, HostIdentity, VlanId, VlanIdentity};
///
/// let identity = HostIdentity::Vlan(VlanIdentity {
///     leaf_index: 2,
///     host_index: 3,
///     vlan: VlanId::new(300).unwrap(),
/// });
/// assert_eq!(host_name(&identity).unwrap(), "h2_3_v300");
/// assert_eq!(host_name(&HostIdentity::Tree { sequence: 7 }).unwrap(), "host_7");
/// ```
pub fn host_name(identity: &HostIdentity) -> FabricResult<String> {
    match identity {
        HostIdentity::Tree { sequence: 0 } => {
            Err(FabricError::invalid("host sequence numbers start at 1"))
        }
        HostIdentity::Vlan(id) if id.leaf_index == 0 || id.host_index == 0 => Err(
            FabricError::invalid("leaf and host indices are 1-based"),
        ),
        _ => Ok(identity.to_string()),
    }
}

/// Locally administered MAC for the `sequence`-th host (1-based)
///
/// The sequence is written as four zero-padded decimal digits across the
/// last two octets, so `42` becomes `02:00:00:00:00:42` and `1234`
/// becomes `02:00:00:00:12:34`.
pub fn mac(sequence: u32) -> FabricResult<String> {
    if sequence == 0 || sequence > MAX_MAC_SEQUENCE {
        return Err(FabricError::invalid(format!(
            "MAC sequence {} outside 1..={}",
            sequence, MAX_MAC_SEQUENCE
        )));
    }
    Ok(format!(
        "02:00:00:00:{:02}:{:02}",
        sequence / 100,
        sequence % 100
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_names() {
        assert_eq!(switch_name(SwitchTier::Root, 1).unwrap(), "s0");
        assert_eq!(switch_name(SwitchTier::Aggregation, 3).unwrap(), "s2_3");
        assert_eq!(switch_name(SwitchTier::Access, 9).unwrap(), "s3_9");
        assert_eq!(switch_name(SwitchTier::Spine, 2).unwrap(), "s2");
        assert_eq!(switch_name(SwitchTier::Leaf, 3).unwrap(), "l3");

        assert!(switch_name(SwitchTier::Leaf, 0).is_err());
        assert!(switch_name(SwitchTier::Root, 2).is_err());
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("spine".parse::<SwitchTier>(), Ok(SwitchTier::Spine));
        assert_eq!(" Leaf".parse::<SwitchTier>(), Ok(SwitchTier::Leaf));
        assert!("core".parse::<SwitchTier>().is_err());
    }

    #[test]
    fn test_host_names_reject_zero_indices() {
        let identity = HostIdentity::Vlan(VlanIdentity {
            leaf_index: 0,
            host_index: 1,
            vlan: VlanId::new(100).unwrap(),
        });
        assert!(matches!(
            host_name(&identity),
            Err(FabricError::InvalidTopologyParameter(_))
        ));
        assert!(host_name(&HostIdentity::Tree { sequence: 0 }).is_err());
    }

    #[test]
    fn test_mac_digits() {
        assert_eq!(mac(1).unwrap(), "02:00:00:00:00:01");
        assert_eq!(mac(27).unwrap(), "02:00:00:00:00:27");
        assert_eq!(mac(100).unwrap(), "02:00:00:00:01:00");
        assert_eq!(mac(9999).unwrap(), "02:00:00:00:99:99");
        assert!(mac(0).is_err());
        assert!(mac(10_000).is_err());
    }
}
