//! Emulation substrate boundary.
//!
//! A substrate turns the static topology into live switches, hosts and
//! links, and runs commands on them once they exist. `LinuxSubstrate`
//! drives Open vSwitch and network namespaces; `RecordingSubstrate` keeps
//! an in-memory model of the same state for dry runs and tests.

pub mod command;
pub mod linux;
pub mod recording;

use std::time::Duration;

use log::{debug, info};
use serde::Serialize;

use crate::error::FabricResult;
use crate::identity::InterfaceAddress;
use crate::topology::{LinkAttrs, Node, NodeKind, Topology};

pub use linux::LinuxSubstrate;
pub use recording::{Fault, RecordedCommand, RecordingSubstrate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Switch,
    Host,
}

/// A node that exists on the substrate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeHandle {
    pub name: String,
    pub role: NodeRole,
}

impl NodeHandle {
    pub fn switch(name: &str) -> Self {
        NodeHandle { name: name.to_string(), role: NodeRole::Switch }
    }

    pub fn host(name: &str) -> Self {
        NodeHandle { name: name.to_string(), role: NodeRole::Host }
    }

    /// Handle for a topology node, valid once the node is instantiated
    pub fn of(node: &Node) -> Self {
        match node.kind {
            NodeKind::Switch(_) => NodeHandle::switch(&node.name),
            NodeKind::Host(_) => NodeHandle::host(&node.name),
        }
    }
}

/// One end of a link to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRef {
    pub node: NodeHandle,
    pub interface: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    pub upper: PortRef,
    pub lower: PortRef,
}

/// Node options a substrate may honor
///
/// Options a substrate does not support are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAttrs {
    pub mac_address: Option<String>,
    pub ip: Option<InterfaceAddress>,
    pub protocol_version: Option<String>,
}

impl NodeAttrs {
    pub fn for_node(node: &Node) -> Self {
        match &node.kind {
            NodeKind::Switch(params) => NodeAttrs {
                protocol_version: params.protocol.clone(),
                ..NodeAttrs::default()
            },
            NodeKind::Host(params) => NodeAttrs {
                mac_address: Some(params.mac.clone()),
                // VLAN hosts get their address on the subinterface during provisioning
                ip: params.vlan().is_none().then_some(params.address),
                protocol_version: None,
            },
        }
    }
}

/// Captured result of a command run on a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        ExecOutput { stdout: stdout.into(), stderr: String::new(), exit_code: 0 }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        ExecOutput { stdout: String::new(), stderr: stderr.into(), exit_code }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Most useful text for an error message
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Live emulation backend
///
/// `exec` takes `&self` and may be called from several provisioning
/// workers at once; creation and removal take `&mut self` and run before
/// or after provisioning.
pub trait Substrate: Sync {
    fn add_switch(&mut self, name: &str, attrs: &NodeAttrs) -> FabricResult<NodeHandle>;

    fn add_host(&mut self, name: &str, attrs: &NodeAttrs) -> FabricResult<NodeHandle>;

    fn add_link(
        &mut self,
        upper: &PortRef,
        lower: &PortRef,
        attrs: &LinkAttrs,
    ) -> FabricResult<LinkHandle>;

    /// Name of the host's first link-facing interface
    fn default_interface_name(&self, host: &NodeHandle) -> FabricResult<String>;

    /// Run an argv command on a node
    ///
    /// A nonzero exit is returned as output, not as an error. Errors are
    /// reserved for commands that could not be run or did not finish
    /// within `timeout`.
    fn exec(
        &self,
        node: &NodeHandle,
        command: &[String],
        timeout: Duration,
    ) -> FabricResult<ExecOutput>;

    fn remove_link(&mut self, link: &LinkHandle) -> FabricResult<()>;

    fn remove_node(&mut self, node: &NodeHandle) -> FabricResult<()>;
}

fn port_ref(topology: &Topology, endpoint: &crate::topology::Endpoint) -> PortRef {
    PortRef {
        node: NodeHandle::of(topology.node(endpoint.node)),
        interface: endpoint.interface.clone(),
    }
}

/// Create every node then every link of `topology`, in creation order
pub fn instantiate<S: Substrate + ?Sized>(
    topology: &Topology,
    substrate: &mut S,
) -> FabricResult<Vec<NodeHandle>> {
    let mut handles = Vec::with_capacity(topology.nodes().len());
    for node in topology.nodes() {
        let attrs = NodeAttrs::for_node(node);
        let handle = match node.kind {
            NodeKind::Switch(_) => substrate.add_switch(&node.name, &attrs)?,
            NodeKind::Host(_) => substrate.add_host(&node.name, &attrs)?,
        };
        debug!("Added {:?} {}", handle.role, handle.name);
        handles.push(handle);
    }

    for link in topology.links() {
        let upper = port_ref(topology, &link.upper);
        let lower = port_ref(topology, &link.lower);
        substrate.add_link(&upper, &lower, &link.attrs)?;
        debug!(
            "Linked {}:{} <-> {}:{}",
            upper.node.name, upper.interface, lower.node.name, lower.interface
        );
    }

    info!(
        "Instantiated {} nodes and {} links",
        handles.len(),
        topology.links().len()
    );
    Ok(handles)
}

/// Remove links then nodes of `topology`, in reverse creation order
///
/// Objects that are already gone are not an error.
pub fn teardown<S: Substrate + ?Sized>(topology: &Topology, substrate: &mut S) -> FabricResult<()> {
    for link in topology.links().iter().rev() {
        let handle = LinkHandle {
            upper: port_ref(topology, &link.upper),
            lower: port_ref(topology, &link.lower),
        };
        substrate.remove_link(&handle)?;
    }
    for node in topology.nodes().iter().rev() {
        substrate.remove_node(&NodeHandle::of(node))?;
    }
    info!("Removed {} nodes", topology.nodes().len());
    Ok(())
}
