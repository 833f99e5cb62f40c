//! Access port resolution.
//!
//! Finds the switch port a host's single link lands on. VLAN tagging is
//! configured on that port object, so the switch-side interface is what
//! callers need, not the host's own interface.

use serde::Serialize;

use super::types::{NodeId, Topology};
use crate::error::{FabricError, FabricResult};

/// The switch-side end of a host's link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPort {
    #[serde(skip)]
    pub switch: NodeId,
    #[serde(rename = "switch")]
    pub switch_name: String,
    /// Interface on the switch, e.g. "l2-eth5"
    pub switch_interface: String,
    /// Interface on the host, e.g. "eth0"
    pub host_interface: String,
}

/// Resolve the access switch and port of `host`
///
/// The host must have exactly one link and its far end must be a switch.
/// A far end that is another host means the graph is malformed and yields
/// `TopologyInvariantViolation`; a host that is unknown or unlinked yields
/// `PeerNotFound`.
pub fn find_access_port(host: &str, topology: &Topology) -> FabricResult<AccessPort> {
    let id = topology
        .id_of(host)
        .ok_or_else(|| FabricError::PeerNotFound { host: host.to_string() })?;
    let node = topology.node(id);
    if !node.is_host() {
        return Err(FabricError::invalid(format!("{} is a switch, not a host", host)));
    }

    let mut links = topology.links_of(id);
    let link = links
        .next()
        .ok_or_else(|| FabricError::PeerNotFound { host: host.to_string() })?;
    if links.next().is_some() {
        return Err(FabricError::invariant(format!("host {} has more than one link", host)));
    }

    // Either endpoint may hold the host; normalize before reading the far side
    let (own, far) = link.peer_of(id).ok_or_else(|| {
        FabricError::invariant(format!(
            "link {:?} is indexed under {} but does not touch it",
            link.id, host
        ))
    })?;
    let peer = topology.node(far.node);
    if !peer.is_switch() {
        return Err(FabricError::invariant(format!(
            "host {} is linked to {}, which is not a switch",
            host, peer.name
        )));
    }

    Ok(AccessPort {
        switch: peer.id,
        switch_name: peer.name.clone(),
        switch_interface: far.interface.clone(),
        host_interface: own.interface.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{mac, tree_host_address, HostIdentity, SwitchTier};
    use crate::topology::types::{FabricKind, HostParams, LinkAttrs, LinkRole, SwitchParams};

    fn host_params(sequence: u32) -> HostParams {
        HostParams {
            identity: HostIdentity::Tree { sequence },
            mac: mac(sequence).unwrap(),
            address: tree_host_address(sequence).unwrap(),
        }
    }

    #[test]
    fn test_resolves_switch_side_interface() {
        let mut topo = Topology::new(FabricKind::Tree);
        let s = topo
            .add_switch("s3_1", SwitchParams { tier: SwitchTier::Access, index: 1, protocol: None })
            .unwrap();
        let h = topo.add_host("host_1", host_params(1)).unwrap();
        // Host stored on the upper side; the resolver must still report the switch end
        topo.add_link(h, s, LinkRole::Access, LinkAttrs::default(), None).unwrap();

        let port = find_access_port("host_1", &topo).unwrap();
        assert_eq!(port.switch_name, "s3_1");
        assert_eq!(port.switch_interface, "s3_1-eth1");
        assert_eq!(port.host_interface, "eth0");
    }

    #[test]
    fn test_host_to_host_link_is_invariant_violation() {
        let mut topo = Topology::new(FabricKind::Tree);
        let a = topo.add_host("host_1", host_params(1)).unwrap();
        let b = topo.add_host("host_2", host_params(2)).unwrap();
        topo.add_link(b, a, LinkRole::Access, LinkAttrs::default(), None).unwrap();

        assert!(matches!(
            find_access_port("host_1", &topo),
            Err(FabricError::TopologyInvariantViolation(_))
        ));
    }

    #[test]
    fn test_unlinked_or_unknown_host_is_peer_not_found() {
        let mut topo = Topology::new(FabricKind::Tree);
        topo.add_host("host_1", host_params(1)).unwrap();

        assert!(matches!(
            find_access_port("host_1", &topo),
            Err(FabricError::PeerNotFound { .. })
        ));
        assert!(matches!(
            find_access_port("host_9", &topo),
            Err(FabricError::PeerNotFound { .. })
        ));
    }
}
