//! In-memory substrate.
//!
//! Keeps a model of the live state the Linux substrate would produce
//! (interfaces, VLAN subinterfaces, addresses, default routes, port tags)
//! and answers the `ip -j` and `ovs-vsctl` commands the provisioner issues
//! the way the real tools do, including their "already exists" failures.
//! Every operation is recorded. Faults can be injected per node.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use super::command::render;
use super::{ExecOutput, LinkHandle, NodeAttrs, NodeHandle, NodeRole, PortRef, Substrate};
use crate::error::{FabricError, FabricResult};
use crate::topology::LinkAttrs;

/// Misbehavior injected into commands run on one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Every command exits 1
    Fail,
    /// Every command runs into its timeout
    Hang,
    /// Commands whose rendered text contains the pattern exit 1
    FailCommand(String),
}

/// One operation seen by the substrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedCommand {
    pub node: String,
    pub command: String,
}

#[derive(Debug, Clone, Default)]
struct Interface {
    up: bool,
    /// (parent interface, VLAN id) for subinterfaces
    vlan: Option<(String, u16)>,
    addresses: Vec<String>,
    /// Access tag when the interface is a switch port
    tag: Option<u16>,
}

#[derive(Debug)]
struct LiveNode {
    role: NodeRole,
    interfaces: BTreeMap<String, Interface>,
    /// Link-facing interfaces in the order links were added
    link_order: Vec<String>,
    default_routes: Vec<String>,
    attrs: NodeAttrs,
    controller: Option<String>,
}

impl LiveNode {
    fn new(role: NodeRole, attrs: &NodeAttrs) -> Self {
        LiveNode {
            role,
            interfaces: BTreeMap::new(),
            link_order: Vec::new(),
            default_routes: Vec::new(),
            attrs: attrs.clone(),
            controller: None,
        }
    }
}

#[derive(Debug, Default)]
struct LiveState {
    nodes: HashMap<String, LiveNode>,
    commands: Vec<RecordedCommand>,
}

impl LiveState {
    fn record(&mut self, node: &str, command: impl Into<String>) {
        self.commands.push(RecordedCommand { node: node.to_string(), command: command.into() });
    }
}

#[derive(Debug, Default)]
pub struct RecordingSubstrate {
    state: Mutex<LiveState>,
    faults: HashMap<String, Fault>,
}

fn no_device(dev: &str) -> ExecOutput {
    ExecOutput::failed(1, format!("Device \"{}\" does not exist.", dev))
}

fn cannot_find(dev: &str) -> ExecOutput {
    ExecOutput::failed(1, format!("Cannot find device \"{}\"", dev))
}

fn no_port(port: &str) -> ExecOutput {
    ExecOutput::failed(1, format!("ovs-vsctl: no row \"{}\" in table Port", port))
}

fn file_exists() -> ExecOutput {
    ExecOutput::failed(2, "RTNETLINK answers: File exists")
}

impl RecordingSubstrate {
    pub fn new() -> Self {
        RecordingSubstrate::default()
    }

    /// Inject a fault into every later command on `node`
    pub fn inject(&mut self, node: &str, fault: Fault) {
        self.faults.insert(node.to_string(), fault);
    }

    fn state(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every recorded operation, in order
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state().commands.clone()
    }

    /// Recorded operations on one node, in order
    pub fn commands_on(&self, node: &str) -> Vec<String> {
        self.state()
            .commands
            .iter()
            .filter(|c| c.node == node)
            .map(|c| c.command.clone())
            .collect()
    }

    pub fn has_node(&self, node: &str) -> bool {
        self.state().nodes.contains_key(node)
    }

    pub fn port_tag(&self, switch: &str, port: &str) -> Option<u16> {
        self.state()
            .nodes
            .get(switch)
            .and_then(|n| n.interfaces.get(port))
            .and_then(|i| i.tag)
    }

    pub fn addresses(&self, host: &str, dev: &str) -> Vec<String> {
        self.state()
            .nodes
            .get(host)
            .and_then(|n| n.interfaces.get(dev))
            .map(|i| i.addresses.clone())
            .unwrap_or_default()
    }

    pub fn is_up(&self, host: &str, dev: &str) -> bool {
        self.state()
            .nodes
            .get(host)
            .and_then(|n| n.interfaces.get(dev))
            .is_some_and(|i| i.up)
    }

    /// Device of the host's default route, if any
    pub fn default_route(&self, host: &str) -> Option<String> {
        self.state().nodes.get(host).and_then(|n| n.default_routes.first().cloned())
    }

    pub fn controller(&self, switch: &str) -> Option<String> {
        self.state().nodes.get(switch).and_then(|n| n.controller.clone())
    }

    pub fn protocols(&self, switch: &str) -> Option<String> {
        self.state()
            .nodes
            .get(switch)
            .and_then(|n| n.attrs.protocol_version.clone())
    }

    fn add_node(
        &mut self,
        name: &str,
        role: NodeRole,
        attrs: &NodeAttrs,
    ) -> FabricResult<NodeHandle> {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.nodes.contains_key(name) {
            return Err(FabricError::Substrate {
                node: name.to_string(),
                message: "node already exists".to_string(),
            });
        }
        state.nodes.insert(name.to_string(), LiveNode::new(role, attrs));
        let label = match role {
            NodeRole::Switch => "add switch",
            NodeRole::Host => "add host",
        };
        state.record(name, label);
        Ok(NodeHandle { name: name.to_string(), role })
    }
}

fn attach(state: &mut LiveState, port: &PortRef) -> FabricResult<()> {
    let node = state.nodes.get_mut(&port.node.name).ok_or_else(|| FabricError::Substrate {
        node: port.node.name.clone(),
        message: "link endpoint does not exist".to_string(),
    })?;
    if node.interfaces.contains_key(&port.interface) {
        return Err(FabricError::Substrate {
            node: port.node.name.clone(),
            message: format!("interface {} already exists", port.interface),
        });
    }

    let mut interface = Interface { up: true, ..Interface::default() };
    // Addressed hosts get their address on the first link
    if node.role == NodeRole::Host && node.link_order.is_empty() {
        if let Some(ip) = node.attrs.ip {
            interface.addresses.push(ip.to_string());
        }
    }
    node.interfaces.insert(port.interface.clone(), interface);
    node.link_order.push(port.interface.clone());
    Ok(())
}

fn detach(state: &mut LiveState, port: &PortRef) {
    if let Some(node) = state.nodes.get_mut(&port.node.name) {
        let port_name = &port.interface;
        node.interfaces.retain(|name, iface| {
            let child_of_port = matches!(&iface.vlan, Some((parent, _)) if parent == port_name);
            name != port_name && !child_of_port
        });
        node.link_order.retain(|name| name != &port.interface);
        let interfaces = &node.interfaces;
        node.default_routes.retain(|dev| interfaces.contains_key(dev));
    }
}

fn link_json(name: &str, iface: &Interface) -> serde_json::Value {
    let mut flags = vec!["BROADCAST", "MULTICAST"];
    if iface.up {
        flags.extend(["UP", "LOWER_UP"]);
    }
    let mut entry = json!({
        "ifname": name,
        "flags": flags,
        "operstate": if iface.up { "UP" } else { "DOWN" },
    });
    if let Some((parent, id)) = &iface.vlan {
        entry["link"] = json!(parent);
        entry["linkinfo"] = json!({ "info_kind": "vlan", "info_data": { "id": id } });
    }
    entry
}

fn addr_json(name: &str, iface: &Interface) -> serde_json::Value {
    let addr_info: Vec<serde_json::Value> = iface
        .addresses
        .iter()
        .filter_map(|cidr| {
            let (local, prefix) = cidr.split_once('/')?;
            let prefixlen: u8 = prefix.parse().ok()?;
            Some(json!({ "family": "inet", "local": local, "prefixlen": prefixlen }))
        })
        .collect();
    json!({ "ifname": name, "addr_info": addr_info })
}

/// Apply one command to a node's model, answering like iproute2/ovs-vsctl
fn apply(node: &mut LiveNode, args: &[&str]) -> ExecOutput {
    match args {
        ["ip", "-j", "link", "show", "dev", dev] => match node.interfaces.get(*dev) {
            Some(iface) => ExecOutput::ok(json!([link_json(dev, iface)]).to_string()),
            None => no_device(dev),
        },
        ["ip", "link", "add", "link", base, "name", sub, "type", "vlan", "id", id] => {
            let Ok(id) = id.parse::<u16>() else {
                let message = format!("Error: argument \"{}\" is wrong: id is invalid", id);
                return ExecOutput::failed(255, message);
            };
            if !node.interfaces.contains_key(*base) {
                return no_device(base);
            }
            if node.interfaces.contains_key(*sub) {
                return file_exists();
            }
            node.interfaces.insert(
                sub.to_string(),
                Interface { vlan: Some((base.to_string(), id)), ..Interface::default() },
            );
            ExecOutput::ok("")
        }
        ["ip", "link", "set", "dev", dev, "up"] => match node.interfaces.get_mut(*dev) {
            Some(iface) => {
                iface.up = true;
                ExecOutput::ok("")
            }
            None => cannot_find(dev),
        },
        ["ip", "-j", "addr", "show", "dev", dev] => match node.interfaces.get(*dev) {
            Some(iface) => ExecOutput::ok(json!([addr_json(dev, iface)]).to_string()),
            None => no_device(dev),
        },
        ["ip", "addr", "flush", "dev", dev] => match node.interfaces.get_mut(*dev) {
            Some(iface) => {
                iface.addresses.clear();
                ExecOutput::ok("")
            }
            None => no_device(dev),
        },
        ["ip", "addr", "add", cidr, "dev", dev] => match node.interfaces.get_mut(*dev) {
            Some(iface) if iface.addresses.iter().any(|a| a == cidr) => file_exists(),
            Some(iface) => {
                iface.addresses.push(cidr.to_string());
                ExecOutput::ok("")
            }
            None => cannot_find(dev),
        },
        ["ip", "-j", "route", "show", "default"] => {
            let routes: Vec<serde_json::Value> = node
                .default_routes
                .iter()
                .map(|dev| json!({ "dst": "default", "dev": dev, "flags": [] }))
                .collect();
            ExecOutput::ok(json!(routes).to_string())
        }
        ["ip", "route", "add", "default", "dev", dev] => {
            if !node.interfaces.contains_key(*dev) {
                return cannot_find(dev);
            }
            if !node.default_routes.is_empty() {
                return file_exists();
            }
            node.default_routes.push(dev.to_string());
            ExecOutput::ok("")
        }
        ["ovs-vsctl", "get", "Port", port, "tag"] => match node.interfaces.get(*port) {
            Some(iface) => ExecOutput::ok(format!(
                "{}\n",
                iface.tag.map(|t| t.to_string()).unwrap_or_else(|| "[]".to_string())
            )),
            None => no_port(port),
        },
        ["ovs-vsctl", "set", "Port", port, setting] if setting.starts_with("tag=") => {
            let Some(iface) = node.interfaces.get_mut(*port) else {
                return no_port(port);
            };
            match setting["tag=".len()..].parse::<u16>() {
                Ok(tag) => {
                    iface.tag = Some(tag);
                    ExecOutput::ok("")
                }
                Err(_) => ExecOutput::failed(1, format!("ovs-vsctl: {}: invalid tag", setting)),
            }
        }
        ["ovs-vsctl", "set", "bridge", _, setting] if setting.starts_with("protocols=") => {
            node.attrs.protocol_version = Some(setting["protocols=".len()..].to_string());
            ExecOutput::ok("")
        }
        ["ovs-vsctl", "set-controller", _, target] => {
            node.controller = Some(target.to_string());
            ExecOutput::ok("")
        }
        // Anything else is accepted and only recorded
        _ => ExecOutput::ok(""),
    }
}

impl Substrate for RecordingSubstrate {
    fn add_switch(&mut self, name: &str, attrs: &NodeAttrs) -> FabricResult<NodeHandle> {
        self.add_node(name, NodeRole::Switch, attrs)
    }

    fn add_host(&mut self, name: &str, attrs: &NodeAttrs) -> FabricResult<NodeHandle> {
        self.add_node(name, NodeRole::Host, attrs)
    }

    fn add_link(
        &mut self,
        upper: &PortRef,
        lower: &PortRef,
        attrs: &LinkAttrs,
    ) -> FabricResult<LinkHandle> {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        attach(state, upper)?;
        attach(state, lower)?;

        let mut shaping = String::new();
        if let Some(delay) = attrs.delay {
            shaping.push_str(&format!(" delay={}", crate::utils::duration::format_delay(delay)));
        }
        if let Some(bw) = attrs.bandwidth {
            shaping.push_str(&format!(" rate={}", bw));
        }
        let entry = format!(
            "add link {} <-> {}:{}{}",
            upper.interface, lower.node.name, lower.interface, shaping
        );
        state.record(&upper.node.name, entry);
        Ok(LinkHandle { upper: upper.clone(), lower: lower.clone() })
    }

    fn default_interface_name(&self, host: &NodeHandle) -> FabricResult<String> {
        let state = self.state();
        let node = state.nodes.get(&host.name).ok_or_else(|| FabricError::Substrate {
            node: host.name.clone(),
            message: "node does not exist".to_string(),
        })?;
        node.link_order.first().cloned().ok_or_else(|| FabricError::Substrate {
            node: host.name.clone(),
            message: "host has no interfaces".to_string(),
        })
    }

    fn exec(
        &self,
        node: &NodeHandle,
        command: &[String],
        timeout: Duration,
    ) -> FabricResult<ExecOutput> {
        let rendered = render(command);
        let mut state = self.state();
        state.record(&node.name, rendered.clone());

        match self.faults.get(&node.name) {
            Some(Fault::Hang) => {
                return Err(FabricError::ProvisioningTimeout {
                    node: node.name.clone(),
                    command: rendered,
                    timeout,
                })
            }
            Some(Fault::Fail) => return Ok(ExecOutput::failed(1, "injected failure")),
            Some(Fault::FailCommand(pattern)) if rendered.contains(pattern.as_str()) => {
                return Ok(ExecOutput::failed(1, "injected failure"))
            }
            _ => {}
        }

        let live = state.nodes.get_mut(&node.name).ok_or_else(|| FabricError::Substrate {
            node: node.name.clone(),
            message: "node does not exist".to_string(),
        })?;
        let args: Vec<&str> = command.iter().map(String::as_str).collect();
        Ok(apply(live, &args))
    }

    fn remove_link(&mut self, link: &LinkHandle) -> FabricResult<()> {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        detach(state, &link.upper);
        detach(state, &link.lower);
        state.record(&link.upper.node.name, format!("del link {}", link.upper.interface));
        Ok(())
    }

    fn remove_node(&mut self, node: &NodeHandle) -> FabricResult<()> {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.nodes.remove(&node.name);
        state.record(&node.name, "del node");
        Ok(())
    }
}
