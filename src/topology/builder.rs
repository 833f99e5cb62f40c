//! Topology construction.
//!
//! Builds the tree and spine-leaf graphs from their shape parameters.
//! Creation order is part of the contract: the MAC sequence and the VLAN
//! round robin both follow it, so reordering the loops below changes every
//! derived address.

use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::types::{
    FabricKind, HostParams, LinkAttrs, LinkRole, SwitchParams, Topology, MAX_INTERFACE_NAME,
};
use crate::error::{FabricError, FabricResult};
use crate::identity::{
    host_name, mac, switch_name, tree_host_address, HostIdentity, SwitchTier, VlanIdentity,
    VlanPlan, MAX_ADDRESS_INDEX, MAX_MAC_SEQUENCE,
};
use crate::utils::bandwidth::Bandwidth;

/// Shape of a three-tier tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeShape {
    #[serde(default = "default_fanout")]
    pub fanout: u32,
    /// Root to aggregation links (d1)
    #[serde(default = "default_root_link")]
    pub root_link: LinkAttrs,
    /// Aggregation to access links (d2)
    #[serde(default = "default_aggregation_link")]
    pub aggregation_link: LinkAttrs,
    /// Access switch to host links (d3)
    #[serde(default = "default_tree_host_link")]
    pub host_link: LinkAttrs,
}

/// Shape of a spine-leaf fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosShape {
    #[serde(default = "default_spines")]
    pub spines: u32,
    #[serde(default = "default_leaves")]
    pub leaves: u32,
    #[serde(default = "default_hosts_per_leaf")]
    pub hosts_per_leaf: u32,
    /// Spine to leaf links
    #[serde(default = "default_core_link")]
    pub core_link: LinkAttrs,
    /// Leaf to host links
    #[serde(default = "default_clos_host_link")]
    pub host_link: LinkAttrs,
}

/// Shape parameters of any supported fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeParams {
    Tree(TreeShape),
    Clos(ClosShape),
}

impl ShapeParams {
    pub fn kind(&self) -> FabricKind {
        match self {
            Self::Tree(_) => FabricKind::Tree,
            Self::Clos(_) => FabricKind::Clos,
        }
    }
}

fn default_fanout() -> u32 {
    3
}

fn default_root_link() -> LinkAttrs {
    LinkAttrs::with_delay(Duration::from_millis(10))
}

fn default_aggregation_link() -> LinkAttrs {
    LinkAttrs::with_delay(Duration::from_millis(20))
}

fn default_tree_host_link() -> LinkAttrs {
    LinkAttrs::with_delay(Duration::from_millis(10))
}

fn default_spines() -> u32 {
    2
}

fn default_leaves() -> u32 {
    3
}

fn default_hosts_per_leaf() -> u32 {
    4
}

fn default_core_link() -> LinkAttrs {
    LinkAttrs::new(Some(Bandwidth::from_mbps(10)), Some(Duration::from_millis(1)))
}

fn default_clos_host_link() -> LinkAttrs {
    LinkAttrs::new(Some(Bandwidth::from_mbps(1)), Some(Duration::from_millis(5)))
}

impl Default for TreeShape {
    fn default() -> Self {
        TreeShape {
            fanout: default_fanout(),
            root_link: default_root_link(),
            aggregation_link: default_aggregation_link(),
            host_link: default_tree_host_link(),
        }
    }
}

impl Default for ClosShape {
    fn default() -> Self {
        ClosShape {
            spines: default_spines(),
            leaves: default_leaves(),
            hosts_per_leaf: default_hosts_per_leaf(),
            core_link: default_core_link(),
            host_link: default_clos_host_link(),
        }
    }
}

/// Settings shared by every shape
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub vlan_plan: VlanPlan,
    /// Protocol version tag put on every switch, e.g. "OpenFlow13"
    pub protocol: Option<String>,
}

/// Build the graph for `shape`
///
/// Parameters are validated before the first node is created, and the
/// graph is only returned once every invariant has been checked.
pub fn build(shape: &ShapeParams, options: &BuildOptions) -> FabricResult<Topology> {
    let topology = match shape {
        ShapeParams::Tree(tree) => build_tree(tree, options)?,
        ShapeParams::Clos(clos) => build_clos(clos, options)?,
    };
    verify_invariants(&topology)?;

    let summary = topology.summary();
    info!(
        "Built {:?} fabric: {} switches, {} hosts, {} links",
        summary.kind, summary.switches, summary.hosts, summary.links
    );
    Ok(topology)
}

/// Check a tree shape without building it
pub fn validate_tree(shape: &TreeShape) -> FabricResult<()> {
    let f = u64::from(shape.fanout);
    if f == 0 {
        return Err(FabricError::invalid("tree fanout must be at least 1"));
    }
    let hosts = f.checked_pow(3).unwrap_or(u64::MAX);
    if hosts > u64::from(MAX_MAC_SEQUENCE) {
        return Err(FabricError::invalid(format!(
            "tree fanout {} yields {} hosts, at most {} are supported",
            f, hosts, MAX_MAC_SEQUENCE
        )));
    }
    // Widest names: last access switch, each switch having f children plus an uplink
    check_interface_len(&format!("s3_{}-eth{}", f * f, f + 1))?;
    check_interface_len(&format!("s2_{}-eth{}", f, f + 1))
}

/// Check a spine-leaf shape without building it
pub fn validate_clos(shape: &ClosShape, plan: &VlanPlan) -> FabricResult<()> {
    for (what, value) in [
        ("spines", shape.spines),
        ("leaves", shape.leaves),
        ("hosts_per_leaf", shape.hosts_per_leaf),
    ] {
        if value == 0 {
            return Err(FabricError::invalid(format!("{} must be at least 1", what)));
        }
    }
    if shape.leaves > MAX_ADDRESS_INDEX || shape.hosts_per_leaf > MAX_ADDRESS_INDEX {
        return Err(FabricError::invalid(format!(
            "leaves and hosts_per_leaf must not exceed {}",
            MAX_ADDRESS_INDEX
        )));
    }
    let hosts = u64::from(shape.leaves) * u64::from(shape.hosts_per_leaf);
    if hosts > u64::from(MAX_MAC_SEQUENCE) {
        return Err(FabricError::invalid(format!(
            "{} hosts requested, at most {} are supported",
            hosts, MAX_MAC_SEQUENCE
        )));
    }
    plan.validate()?;
    check_interface_len(&format!(
        "l{}-eth{}",
        shape.leaves,
        u64::from(shape.spines) + u64::from(shape.hosts_per_leaf)
    ))?;
    check_interface_len(&format!("s{}-eth{}", shape.spines, shape.leaves))
}

fn check_interface_len(widest: &str) -> FabricResult<()> {
    if widest.len() > MAX_INTERFACE_NAME {
        return Err(FabricError::invalid(format!(
            "shape needs interface name {} longer than {} characters",
            widest, MAX_INTERFACE_NAME
        )));
    }
    Ok(())
}

fn switch_params(tier: SwitchTier, index: u32, options: &BuildOptions) -> SwitchParams {
    SwitchParams {
        tier,
        index,
        protocol: options.protocol.clone(),
    }
}

/// Build a tree: root, `fanout` aggregation switches, `fanout` access
/// switches under each, `fanout` hosts under each access switch
pub fn build_tree(shape: &TreeShape, options: &BuildOptions) -> FabricResult<Topology> {
    validate_tree(shape)?;
    let fanout = shape.fanout;
    let mut topo = Topology::new(FabricKind::Tree);

    let root_name = switch_name(SwitchTier::Root, 1)?;
    let root = topo.add_switch(&root_name, switch_params(SwitchTier::Root, 1, options))?;

    let mut host_sequence = 0u32;
    for a in 1..=fanout {
        let agg_name = switch_name(SwitchTier::Aggregation, a)?;
        let agg = topo.add_switch(&agg_name, switch_params(SwitchTier::Aggregation, a, options))?;
        topo.add_link(root, agg, LinkRole::Uplink, shape.root_link, None)?;

        for b in 1..=fanout {
            let access_index = (a - 1) * fanout + b;
            let acc_name = switch_name(SwitchTier::Access, access_index)?;
            let acc = topo.add_switch(
                &acc_name,
                switch_params(SwitchTier::Access, access_index, options),
            )?;
            topo.add_link(agg, acc, LinkRole::Uplink, shape.aggregation_link, None)?;

            for _ in 1..=fanout {
                host_sequence += 1;
                let identity = HostIdentity::Tree { sequence: host_sequence };
                let name = host_name(&identity)?;
                let params = HostParams {
                    identity,
                    mac: mac(host_sequence)?,
                    address: tree_host_address(host_sequence)?,
                };
                let host = topo.add_host(&name, params)?;
                topo.add_link(acc, host, LinkRole::Access, shape.host_link, None)?;
                debug!("Added {} under {}", name, acc_name);
            }
        }
    }
    Ok(topo)
}

/// Build a spine-leaf fabric with VLAN hosts on every leaf
pub fn build_clos(shape: &ClosShape, options: &BuildOptions) -> FabricResult<Topology> {
    let plan = &options.vlan_plan;
    validate_clos(shape, plan)?;
    let mut topo = Topology::new(FabricKind::Clos);

    let mut spines = Vec::with_capacity(shape.spines as usize);
    for i in 1..=shape.spines {
        let name = switch_name(SwitchTier::Spine, i)?;
        spines.push(topo.add_switch(&name, switch_params(SwitchTier::Spine, i, options))?);
    }
    let mut leaves = Vec::with_capacity(shape.leaves as usize);
    for j in 1..=shape.leaves {
        let name = switch_name(SwitchTier::Leaf, j)?;
        leaves.push(topo.add_switch(&name, switch_params(SwitchTier::Leaf, j, options))?);
    }

    // Full spine/leaf mesh
    for &spine in &spines {
        for &leaf in &leaves {
            topo.add_link(spine, leaf, LinkRole::Fabric, shape.core_link, None)?;
        }
    }

    let mut host_sequence = 0u32;
    for (leaf_index, &leaf) in (1u32..).zip(&leaves) {
        for host_index in 1..=shape.hosts_per_leaf {
            let vlan = plan.vlan_for_index(host_index)?;
            let identity = HostIdentity::Vlan(VlanIdentity { leaf_index, host_index, vlan });
            let name = host_name(&identity)?;
            host_sequence += 1;
            let params = HostParams {
                identity,
                mac: mac(host_sequence)?,
                address: plan.ip_for(vlan, leaf_index, host_index)?,
            };
            let host = topo.add_host(&name, params)?;
            topo.add_link(leaf, host, LinkRole::Access, shape.host_link, Some(vlan))?;
            debug!("Added {} on VLAN {} under {}", name, vlan, topo.node(leaf).name);
        }
    }
    Ok(topo)
}

/// Check the structural invariants of a built graph
///
/// Every host has exactly one link and it ends at a switch; in a tree,
/// every switch except the root has exactly one uplink.
pub fn verify_invariants(topology: &Topology) -> FabricResult<()> {
    for host in topology.hosts() {
        let links: Vec<_> = topology.links_of(host.id).collect();
        if links.len() != 1 {
            return Err(FabricError::invariant(format!(
                "host {} has {} links, expected exactly one",
                host.name,
                links.len()
            )));
        }
        let far = links[0]
            .peer_of(host.id)
            .map(|(_, far)| topology.node(far.node))
            .ok_or_else(|| FabricError::invariant(format!("link of {} is detached", host.name)))?;
        if !far.is_switch() {
            return Err(FabricError::invariant(format!(
                "host {} is linked to {}, which is not a switch",
                host.name, far.name
            )));
        }
    }

    if topology.kind() == FabricKind::Tree {
        for switch in topology.switches() {
            let is_root = switch.as_switch().map(|s| s.tier) == Some(SwitchTier::Root);
            let uplinks = topology.uplinks_of(switch.id).count();
            let expected = if is_root { 0 } else { 1 };
            if uplinks != expected {
                return Err(FabricError::invariant(format!(
                    "switch {} has {} uplinks, expected {}",
                    switch.name, uplinks, expected
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn tree(fanout: u32) -> Topology {
        let shape = ShapeParams::Tree(TreeShape { fanout, ..TreeShape::default() });
        build(&shape, &BuildOptions::default()).unwrap()
    }

    fn clos(spines: u32, leaves: u32, hosts_per_leaf: u32) -> Topology {
        let shape = ShapeParams::Clos(ClosShape {
            spines,
            leaves,
            hosts_per_leaf,
            ..ClosShape::default()
        });
        build(&shape, &BuildOptions::default()).unwrap()
    }

    #[test]
    fn test_tree_counts() {
        for f in 1..=5u32 {
            let topo = tree(f);
            let summary = topo.summary();
            assert_eq!(summary.hosts, (f * f * f) as usize);
            assert_eq!(summary.switches, (1 + f + f * f) as usize);
            assert_eq!(summary.links, (f + f * f + f * f * f) as usize);

            let names: HashSet<_> = topo.nodes().iter().map(|n| n.name.clone()).collect();
            assert_eq!(names.len(), topo.nodes().len());
        }
    }

    #[test]
    fn test_tree_order_and_macs() {
        let topo = tree(2);
        let hosts: Vec<_> = topo.hosts().map(|h| h.name.as_str()).collect();
        let expected: Vec<String> = (1..=8).map(|i| format!("host_{}", i)).collect();
        assert_eq!(hosts, expected);

        let switches: Vec<_> = topo.switches().map(|s| s.name.as_str()).collect();
        assert_eq!(switches, ["s0", "s2_1", "s3_1", "s3_2", "s2_2", "s3_3", "s3_4"]);

        let h5 = topo.node_by_name("host_5").unwrap().as_host().unwrap();
        assert_eq!(h5.mac, "02:00:00:00:00:05");
        assert_eq!(h5.address.to_string(), "10.0.0.5/8");
    }

    #[test]
    fn test_tree_rejects_bad_fanout() {
        for fanout in [0, 22, u32::MAX] {
            let shape = ShapeParams::Tree(TreeShape { fanout, ..TreeShape::default() });
            assert!(matches!(
                build(&shape, &BuildOptions::default()),
                Err(FabricError::InvalidTopologyParameter(_))
            ));
        }
        assert!(validate_tree(&TreeShape { fanout: 21, ..TreeShape::default() }).is_ok());
    }

    #[test]
    fn test_clos_mesh_and_vlans() {
        let topo = clos(2, 3, 4);
        let summary = topo.summary();
        assert_eq!(summary.switches, 5);
        assert_eq!(summary.hosts, 12);
        assert_eq!(summary.links, 2 * 3 + 12);

        // Every leaf sees every spine
        for leaf in ["l1", "l2", "l3"] {
            let id = topo.id_of(leaf).unwrap();
            let spines: HashSet<_> = topo
                .uplinks_of(id)
                .map(|l| topo.node(l.upper.node).name.clone())
                .collect();
            assert_eq!(spines, HashSet::from(["s1".to_string(), "s2".to_string()]));
        }

        let host = topo.node_by_name("h3_4_v400").unwrap();
        let params = host.as_host().unwrap();
        assert_eq!(params.address.to_string(), "10.4.3.4/24");
        let link = topo.links_of(host.id).next().unwrap();
        assert_eq!(link.access_vlan.map(|v| v.get()), Some(400));
        assert_eq!(link.role, LinkRole::Access);
    }

    #[test]
    fn test_clos_addresses_unique() {
        let topo = clos(2, 6, 9);
        let mut seen = HashSet::new();
        for host in topo.hosts() {
            assert!(seen.insert(host.as_host().unwrap().address));
        }
        assert_eq!(seen.len(), 54);
    }

    #[test]
    fn test_clos_rejects_bad_shapes() {
        let options = BuildOptions::default();
        for shape in [
            ClosShape { spines: 0, ..ClosShape::default() },
            ClosShape { leaves: 0, ..ClosShape::default() },
            ClosShape { hosts_per_leaf: 0, ..ClosShape::default() },
            ClosShape { leaves: 255, ..ClosShape::default() },
            ClosShape { hosts_per_leaf: 255, ..ClosShape::default() },
            ClosShape { leaves: 100, hosts_per_leaf: 200, ..ClosShape::default() },
        ] {
            assert!(matches!(
                build(&ShapeParams::Clos(shape), &options),
                Err(FabricError::InvalidTopologyParameter(_))
            ));
        }
    }

    #[test]
    fn test_protocol_tag_applied_to_switches() {
        let options = BuildOptions {
            protocol: Some("OpenFlow13".to_string()),
            ..BuildOptions::default()
        };
        let topo = build(&ShapeParams::Clos(ClosShape::default()), &options).unwrap();
        assert!(topo
            .switches()
            .all(|s| s.as_switch().unwrap().protocol.as_deref() == Some("OpenFlow13")));
    }

    #[test]
    fn test_shape_yaml_defaults() {
        let shape: ShapeParams = serde_yaml::from_str("type: tree\nfanout: 2\n").unwrap();
        match shape {
            ShapeParams::Tree(t) => {
                assert_eq!(t.fanout, 2);
                assert_eq!(t.aggregation_link.delay, Some(Duration::from_millis(20)));
            }
            other => panic!("expected tree, got {:?}", other),
        }

        let yaml = "type: clos\nleaves: 2\nhost_link:\n  bandwidth: 2Mbit\n  delay: 3ms\n";
        let shape: ShapeParams = serde_yaml::from_str(yaml).unwrap();
        match shape {
            ShapeParams::Clos(c) => {
                assert_eq!(c.spines, 2);
                assert_eq!(c.leaves, 2);
                assert_eq!(c.host_link.bandwidth, Some(Bandwidth::from_mbps(2)));
                assert_eq!(c.host_link.delay, Some(Duration::from_millis(3)));
            }
            other => panic!("expected clos, got {:?}", other),
        }
    }
}
