//! Topology graph types.
//!
//! Nodes and links are stored in creation order. Links are oriented at
//! construction time: `upper` is the endpoint closer to the top of the
//! fabric (root, spine, or the switch of a host link) and `lower` the other.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, FabricResult};
use crate::identity::{HostIdentity, IdentityRegistry, InterfaceAddress, SwitchTier, VlanId};
use crate::utils::bandwidth::Bandwidth;

/// Longest interface name Linux accepts (IFNAMSIZ - 1)
pub const MAX_INTERFACE_NAME: usize = 15;

/// Shape family of a fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FabricKind {
    /// Three switch tiers with a uniform fan-out
    Tree,
    /// Spine-leaf with a full spine/leaf mesh
    Clos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkId(pub usize);

/// Switch-only attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchParams {
    pub tier: SwitchTier,
    /// 1-based index within the tier
    pub index: u32,
    /// Forwarding protocol version the switch should speak, e.g. "OpenFlow13"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Host-only attributes, fixed at build time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostParams {
    pub identity: HostIdentity,
    pub mac: String,
    pub address: InterfaceAddress,
}

impl HostParams {
    pub fn vlan(&self) -> Option<VlanId> {
        self.identity.vlan().map(|id| id.vlan)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Switch(SwitchParams),
    Host(HostParams),
}

/// A switch or a host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    #[serde(skip)]
    pub id: NodeId,
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn is_switch(&self) -> bool {
        matches!(self.kind, NodeKind::Switch(_))
    }

    pub fn is_host(&self) -> bool {
        matches!(self.kind, NodeKind::Host(_))
    }

    pub fn as_host(&self) -> Option<&HostParams> {
        match &self.kind {
            NodeKind::Host(params) => Some(params),
            NodeKind::Switch(_) => None,
        }
    }

    pub fn as_switch(&self) -> Option<&SwitchParams> {
        match &self.kind {
            NodeKind::Switch(params) => Some(params),
            NodeKind::Host(_) => None,
        }
    }
}

/// Per-link shaping attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<Bandwidth>,
    #[serde(
        default,
        with = "crate::utils::duration::serde_delay",
        skip_serializing_if = "Option::is_none"
    )]
    pub delay: Option<Duration>,
}

impl LinkAttrs {
    pub fn new(bandwidth: Option<Bandwidth>, delay: Option<Duration>) -> Self {
        LinkAttrs { bandwidth, delay }
    }

    pub fn with_delay(delay: Duration) -> Self {
        LinkAttrs { bandwidth: None, delay: Some(delay) }
    }
}

/// Which pair of tiers a link joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    /// Switch to the switch above it
    Uplink,
    /// Spine to leaf
    Fabric,
    /// Switch to host
    Access,
}

/// One side of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    #[serde(skip)]
    pub node: NodeId,
    pub interface: String,
}

/// An oriented link between two nodes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    #[serde(skip)]
    pub id: LinkId,
    pub upper: Endpoint,
    pub lower: Endpoint,
    pub role: LinkRole,
    #[serde(flatten)]
    pub attrs: LinkAttrs,
    /// VLAN the switch-side port tags frames with (host links of VLAN fabrics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_vlan: Option<VlanId>,
}

impl Link {
    /// Split the link into (own endpoint, far endpoint) as seen from `node`
    ///
    /// Returns `None` when `node` is not attached to this link.
    pub fn peer_of(&self, node: NodeId) -> Option<(&Endpoint, &Endpoint)> {
        if self.lower.node == node {
            Some((&self.lower, &self.upper))
        } else if self.upper.node == node {
            Some((&self.upper, &self.lower))
        } else {
            None
        }
    }
}

/// Counts describing a built topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TopologySummary {
    pub kind: FabricKind,
    pub switches: usize,
    pub hosts: usize,
    pub links: usize,
}

/// The full switch/host graph of one fabric
#[derive(Debug)]
pub struct Topology {
    kind: FabricKind,
    nodes: Vec<Node>,
    links: Vec<Link>,
    by_name: HashMap<String, NodeId>,
    adjacency: Vec<Vec<LinkId>>,
    next_port: Vec<u32>,
    registry: IdentityRegistry,
}

impl Topology {
    pub fn new(kind: FabricKind) -> Self {
        Topology {
            kind,
            nodes: Vec::new(),
            links: Vec::new(),
            by_name: HashMap::new(),
            adjacency: Vec::new(),
            next_port: Vec::new(),
            registry: IdentityRegistry::new(),
        }
    }

    pub fn kind(&self) -> FabricKind {
        self.kind
    }

    /// Add a switch; its first port is numbered 1
    pub fn add_switch(&mut self, name: &str, params: SwitchParams) -> FabricResult<NodeId> {
        self.push_node(name, NodeKind::Switch(params), 1)
    }

    /// Add a host; its first port is numbered 0
    pub fn add_host(&mut self, name: &str, params: HostParams) -> FabricResult<NodeId> {
        self.registry.register_mac(&params.mac, name)?;
        self.registry.register_address(params.address, name)?;
        self.push_node(name, NodeKind::Host(params), 0)
    }

    fn push_node(&mut self, name: &str, kind: NodeKind, first_port: u32) -> FabricResult<NodeId> {
        self.registry.register_name(name)?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { id, name: name.to_string(), kind });
        self.by_name.insert(name.to_string(), id);
        self.adjacency.push(Vec::new());
        self.next_port.push(first_port);
        Ok(id)
    }

    /// Link `upper` to `lower`, allocating the next interface on each side
    ///
    /// Switch interfaces are named `<switch>-eth<k>` and must be unique on
    /// the machine; host interfaces are named `eth<k>` inside the host.
    pub fn add_link(
        &mut self,
        upper: NodeId,
        lower: NodeId,
        role: LinkRole,
        attrs: LinkAttrs,
        access_vlan: Option<VlanId>,
    ) -> FabricResult<LinkId> {
        if upper == lower {
            return Err(FabricError::invariant(format!(
                "link from {} to itself",
                self.node(upper).name
            )));
        }
        let upper_end = self.allocate_endpoint(upper)?;
        let lower_end = self.allocate_endpoint(lower)?;
        let id = LinkId(self.links.len());
        self.links.push(Link {
            id,
            upper: upper_end,
            lower: lower_end,
            role,
            attrs,
            access_vlan,
        });
        self.adjacency[upper.0].push(id);
        self.adjacency[lower.0].push(id);
        Ok(id)
    }

    fn allocate_endpoint(&mut self, node: NodeId) -> FabricResult<Endpoint> {
        let port = *self
            .next_port
            .get(node.0)
            .ok_or_else(|| FabricError::invariant(format!("unknown node id {}", node.0)))?;
        self.next_port[node.0] += 1;

        let n = &self.nodes[node.0];
        let interface = if n.is_host() {
            format!("eth{}", port)
        } else {
            format!("{}-eth{}", n.name, port)
        };
        if interface.len() > MAX_INTERFACE_NAME {
            return Err(FabricError::invariant(format!(
                "interface name {} exceeds {} characters",
                interface, MAX_INTERFACE_NAME
            )));
        }
        Ok(Endpoint { node, interface })
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.0]
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.id_of(name).map(|id| self.node(id))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Hosts in creation order
    pub fn hosts(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_host())
    }

    /// Switches in creation order
    pub fn switches(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_switch())
    }

    /// Links attached to a node, in creation order
    pub fn links_of(&self, id: NodeId) -> impl Iterator<Item = &Link> {
        self.adjacency
            .get(id.0)
            .into_iter()
            .flatten()
            .map(move |link| &self.links[link.0])
    }

    /// Links on which the node is the lower endpoint
    pub fn uplinks_of(&self, id: NodeId) -> impl Iterator<Item = &Link> {
        self.links_of(id).filter(move |link| link.lower.node == id)
    }

    /// Walk first uplinks from a node to the top of the fabric
    ///
    /// Each entry is the link taken and the node it leads to. In a tree this
    /// is the unique path to the root.
    pub fn path_to_top(&self, id: NodeId) -> Vec<(&Link, NodeId)> {
        let mut path = Vec::new();
        let mut current = id;
        // A well-formed fabric is acyclic, the bound only guards malformed graphs
        while path.len() <= self.nodes.len() {
            match self.uplinks_of(current).next() {
                Some(link) => {
                    current = link.upper.node;
                    path.push((link, current));
                }
                None => break,
            }
        }
        path
    }

    pub fn summary(&self) -> TopologySummary {
        TopologySummary {
            kind: self.kind,
            switches: self.switches().count(),
            hosts: self.hosts().count(),
            links: self.links.len(),
        }
    }
}
