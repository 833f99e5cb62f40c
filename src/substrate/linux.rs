//! Linux substrate: Open vSwitch bridges, network namespaces and veth pairs.
//!
//! Requires root, `ip` (iproute2), `tc` and `ovs-vsctl`. Host commands run
//! inside the host's namespace through `ip netns exec`.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;

use super::command::{self, argv, indicates_already_absent, indicates_already_exists, render};
use super::{ExecOutput, LinkHandle, NodeAttrs, NodeHandle, NodeRole, PortRef, Substrate};
use crate::error::{FabricError, FabricResult};
use crate::topology::LinkAttrs;
use crate::utils::duration::format_delay;

/// How a failed command is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tolerate {
    Nothing,
    Exists,
    Absent,
}

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
}

pub struct LinuxSubstrate {
    timeout: Duration,
    host_attrs: HashMap<String, NodeAttrs>,
    /// Link-facing interfaces per host in creation order
    interfaces: HashMap<String, Vec<String>>,
}

/// Prefix `command` so it runs inside the node's namespace
pub fn wrap(node: &NodeHandle, command: &[String]) -> Vec<String> {
    match node.role {
        NodeRole::Switch => command.to_vec(),
        NodeRole::Host => {
            let mut full = argv(&["ip", "netns", "exec", &node.name]);
            full.extend_from_slice(command);
            full
        }
    }
}

/// `ip link add` for a veth pair whose host ends land in their namespaces
pub fn veth_command(upper: &PortRef, lower: &PortRef) -> Vec<String> {
    let mut cmd = argv(&["ip", "link", "add", "name", &upper.interface]);
    if upper.node.role == NodeRole::Host {
        cmd.extend(argv(&["netns", &upper.node.name]));
    }
    cmd.extend(argv(&["type", "veth", "peer", "name", &lower.interface]));
    if lower.node.role == NodeRole::Host {
        cmd.extend(argv(&["netns", &lower.node.name]));
    }
    cmd
}

/// `tc netem` shaping for one end of a link, if the link is shaped at all
pub fn shaping_command(interface: &str, attrs: &LinkAttrs) -> Option<Vec<String>> {
    if attrs.delay.is_none() && attrs.bandwidth.is_none() {
        return None;
    }
    let mut cmd = argv(&["tc", "qdisc", "replace", "dev", interface, "root", "netem"]);
    if let Some(delay) = attrs.delay {
        cmd.extend(argv(&["delay", &format_delay(delay)]));
    }
    if let Some(bw) = attrs.bandwidth {
        cmd.extend(argv(&["rate", &bw.tc_rate()]));
    }
    Some(cmd)
}

/// Handle whose commands run in the root namespace, labeled `name` in errors
fn root_ns(name: &str) -> NodeHandle {
    NodeHandle::switch(name)
}

impl LinuxSubstrate {
    pub fn new(timeout: Duration) -> Self {
        LinuxSubstrate {
            timeout,
            host_attrs: HashMap::new(),
            interfaces: HashMap::new(),
        }
    }

    fn checked(
        &self,
        node: &NodeHandle,
        command: Vec<String>,
        tolerate: Tolerate,
    ) -> FabricResult<ExecOutput> {
        debug!("[{}] {}", node.name, render(&command));
        let output = self.exec(node, &command, self.timeout)?;
        if output.success() {
            return Ok(output);
        }
        let tolerated = match tolerate {
            Tolerate::Nothing => false,
            Tolerate::Exists => indicates_already_exists(&output),
            Tolerate::Absent => indicates_already_absent(&output),
        };
        if tolerated {
            debug!("[{}] tolerated: {}", node.name, output.diagnostic());
            return Ok(output);
        }
        Err(FabricError::ExternalCommandFailure {
            node: node.name.clone(),
            command: render(&command),
            exit_code: output.exit_code,
            output: output.diagnostic(),
        })
    }

    fn bring_up_end(&mut self, port: &PortRef) -> FabricResult<()> {
        match port.node.role {
            NodeRole::Switch => {
                let bridge = port.node.name.as_str();
                self.checked(
                    &port.node,
                    argv(&["ovs-vsctl", "--may-exist", "add-port", bridge, &port.interface]),
                    Tolerate::Nothing,
                )?;
            }
            NodeRole::Host => {
                let first = self
                    .interfaces
                    .get(&port.node.name)
                    .map_or(true, |ifaces| ifaces.is_empty());
                let attrs = self.host_attrs.get(&port.node.name).cloned().unwrap_or_default();
                if first {
                    if let Some(mac) = &attrs.mac_address {
                        self.checked(
                            &port.node,
                            argv(&["ip", "link", "set", "dev", &port.interface, "address", mac]),
                            Tolerate::Nothing,
                        )?;
                    }
                    if let Some(ip) = attrs.ip {
                        self.checked(
                            &port.node,
                            argv(&["ip", "addr", "add", &ip.to_string(), "dev", &port.interface]),
                            Tolerate::Exists,
                        )?;
                    }
                }
                self.interfaces
                    .entry(port.node.name.clone())
                    .or_default()
                    .push(port.interface.clone());
            }
        }
        let up = argv(&["ip", "link", "set", "dev", &port.interface, "up"]);
        self.checked(&port.node, up, Tolerate::Nothing)?;
        Ok(())
    }

    fn query_interfaces(&self, host: &NodeHandle) -> FabricResult<Vec<String>> {
        let output = self.checked(host, argv(&["ip", "-j", "link", "show"]), Tolerate::Nothing)?;
        let links: Vec<IpLink> =
            serde_json::from_str(&output.stdout).map_err(|e| FabricError::Substrate {
                node: host.name.clone(),
                message: format!("unreadable `ip -j link show` output: {}", e),
            })?;
        Ok(links
            .into_iter()
            .map(|l| l.ifname)
            .filter(|name| name != "lo" && !name.contains('.'))
            .collect())
    }
}

impl Substrate for LinuxSubstrate {
    fn add_switch(&mut self, name: &str, attrs: &NodeAttrs) -> FabricResult<NodeHandle> {
        let handle = NodeHandle::switch(name);
        let add_br = argv(&["ovs-vsctl", "--may-exist", "add-br", name]);
        self.checked(&handle, add_br, Tolerate::Nothing)?;
        if let Some(protocol) = &attrs.protocol_version {
            self.checked(
                &handle,
                argv(&["ovs-vsctl", "set", "bridge", name, &format!("protocols={}", protocol)]),
                Tolerate::Nothing,
            )?;
        }
        self.checked(&handle, argv(&["ip", "link", "set", "dev", name, "up"]), Tolerate::Nothing)?;
        Ok(handle)
    }

    fn add_host(&mut self, name: &str, attrs: &NodeAttrs) -> FabricResult<NodeHandle> {
        let handle = NodeHandle::host(name);
        self.checked(&root_ns(name), argv(&["ip", "netns", "add", name]), Tolerate::Exists)?;
        self.checked(&handle, argv(&["ip", "link", "set", "dev", "lo", "up"]), Tolerate::Nothing)?;
        self.host_attrs.insert(name.to_string(), attrs.clone());
        Ok(handle)
    }

    fn add_link(
        &mut self,
        upper: &PortRef,
        lower: &PortRef,
        attrs: &LinkAttrs,
    ) -> FabricResult<LinkHandle> {
        self.checked(&root_ns(&upper.node.name), veth_command(upper, lower), Tolerate::Exists)?;

        for port in [upper, lower] {
            self.bring_up_end(port)?;
            if let Some(cmd) = shaping_command(&port.interface, attrs) {
                self.checked(&port.node, cmd, Tolerate::Nothing)?;
            }
        }
        Ok(LinkHandle { upper: upper.clone(), lower: lower.clone() })
    }

    fn default_interface_name(&self, host: &NodeHandle) -> FabricResult<String> {
        if let Some(first) = self.interfaces.get(&host.name).and_then(|ifaces| ifaces.first()) {
            return Ok(first.clone());
        }
        // Hosts created by an earlier run are only known to the kernel
        self.query_interfaces(host)?
            .into_iter()
            .next()
            .ok_or_else(|| FabricError::Substrate {
                node: host.name.clone(),
                message: "host has no link-facing interface".to_string(),
            })
    }

    fn exec(
        &self,
        node: &NodeHandle,
        command: &[String],
        timeout: Duration,
    ) -> FabricResult<ExecOutput> {
        command::run(&node.name, &wrap(node, command), timeout)
    }

    fn remove_link(&mut self, link: &LinkHandle) -> FabricResult<()> {
        // Host ends vanish with their namespace; only root-namespace pairs need deleting
        if link.upper.node.role == NodeRole::Switch && link.lower.node.role == NodeRole::Switch {
            let del = argv(&["ip", "link", "del", &link.upper.interface]);
            self.checked(&link.upper.node, del, Tolerate::Absent)?;
        }
        Ok(())
    }

    fn remove_node(&mut self, node: &NodeHandle) -> FabricResult<()> {
        let result = match node.role {
            NodeRole::Switch => {
                let del_br = argv(&["ovs-vsctl", "--if-exists", "del-br", &node.name]);
                self.checked(node, del_br, Tolerate::Absent)
            }
            NodeRole::Host => {
                let del = argv(&["ip", "netns", "del", &node.name]);
                self.checked(&root_ns(&node.name), del, Tolerate::Absent)
            }
        };
        if let Err(e) = &result {
            warn!("Failed to remove {}: {}", node.name, e);
        }
        self.interfaces.remove(&node.name);
        self.host_attrs.remove(&node.name);
        result.map(|_| ())
    }
}
