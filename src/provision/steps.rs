//! Idempotent per-host provisioning steps.
//!
//! Each step first reads the live state and only mutates when the desired
//! state is missing. A create that still fails with "already exists" (a
//! concurrent or earlier run got there first) counts as satisfied.

use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{FabricError, FabricResult};
use crate::identity::{InterfaceAddress, VlanId};
use crate::substrate::command::{argv, indicates_already_absent, indicates_already_exists, render};
use crate::substrate::{ExecOutput, NodeHandle, Substrate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CreateSubinterface,
    LinkUp,
    AssignAddress,
    DefaultRoute,
    TagAccessPort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step changed live state
    Applied,
    /// Live state already matched
    AlreadySatisfied,
    /// A conflicting object held the slot and was left in place
    LeftInPlace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub status: StepStatus,
}

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    #[serde(default)]
    family: String,
    local: String,
    prefixlen: u8,
}

#[derive(Debug, Deserialize)]
struct IpAddr {
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpRoute {
    dst: String,
    #[serde(default)]
    dev: Option<String>,
}

/// Commands against one node with a shared timeout
pub struct NodeSession<'a, S: Substrate + ?Sized> {
    substrate: &'a S,
    node: &'a NodeHandle,
    timeout: Duration,
}

impl<'a, S: Substrate + ?Sized> NodeSession<'a, S> {
    pub fn new(substrate: &'a S, node: &'a NodeHandle, timeout: Duration) -> Self {
        NodeSession { substrate, node, timeout }
    }

    fn run(&self, command: &[String]) -> FabricResult<ExecOutput> {
        log::trace!("[{}] {}", self.node.name, render(command));
        self.substrate.exec(self.node, command, self.timeout)
    }

    fn failure(&self, command: &[String], output: &ExecOutput) -> FabricError {
        FabricError::ExternalCommandFailure {
            node: self.node.name.clone(),
            command: render(command),
            exit_code: output.exit_code,
            output: output.diagnostic(),
        }
    }

    /// Run a command that must succeed
    fn apply(&self, command: &[String]) -> FabricResult<StepStatus> {
        let output = self.run(command)?;
        if output.success() {
            Ok(StepStatus::Applied)
        } else {
            Err(self.failure(command, &output))
        }
    }

    /// Run a create command, accepting "already exists"
    fn create(&self, command: &[String]) -> FabricResult<StepStatus> {
        let output = self.run(command)?;
        if output.success() {
            Ok(StepStatus::Applied)
        } else if indicates_already_exists(&output) {
            log::debug!("[{}] already exists: {}", self.node.name, render(command));
            Ok(StepStatus::AlreadySatisfied)
        } else {
            Err(self.failure(command, &output))
        }
    }

    /// Run a JSON query
    ///
    /// `None` only when the tool reports that the queried device does not
    /// exist. Any other failure is an `ExternalCommandFailure`.
    fn query<T: for<'de> Deserialize<'de>>(&self, command: &[String]) -> FabricResult<Option<T>> {
        let output = self.run(command)?;
        if !output.success() {
            if indicates_already_absent(&output) {
                return Ok(None);
            }
            return Err(self.failure(command, &output));
        }
        // iproute2 prints nothing for an empty result
        let text = output.stdout.trim();
        let text = if text.is_empty() { "[]" } else { text };
        serde_json::from_str(text).map(Some).map_err(|e| FabricError::Substrate {
            node: self.node.name.clone(),
            message: format!("unreadable output of `{}`: {}", render(command), e),
        })
    }

    fn link(&self, dev: &str) -> FabricResult<Option<IpLink>> {
        let links: Option<Vec<IpLink>> =
            self.query(&argv(&["ip", "-j", "link", "show", "dev", dev]))?;
        Ok(links.and_then(|links| links.into_iter().find(|l| l.ifname == dev)))
    }

    fn addresses(&self, dev: &str) -> FabricResult<Vec<IpAddrInfo>> {
        let addrs: Option<Vec<IpAddr>> =
            self.query(&argv(&["ip", "-j", "addr", "show", "dev", dev]))?;
        Ok(addrs.into_iter().flatten().flat_map(|a| a.addr_info).collect())
    }
}

/// `<base>.<vlan>`
pub fn subinterface_name(base: &str, vlan: VlanId) -> String {
    format!("{}.{}", base, vlan)
}

pub fn ensure_subinterface<S: Substrate + ?Sized>(
    session: &NodeSession<'_, S>,
    base: &str,
    vlan: VlanId,
) -> FabricResult<StepStatus> {
    let sub = subinterface_name(base, vlan);
    if session.link(&sub)?.is_some() {
        return Ok(StepStatus::AlreadySatisfied);
    }
    session.create(&argv(&[
        "ip", "link", "add", "link", base, "name", &sub, "type", "vlan", "id", &vlan.to_string(),
    ]))
}

/// Bring every interface in `devs` up
pub fn ensure_up<S: Substrate + ?Sized>(
    session: &NodeSession<'_, S>,
    devs: &[&str],
) -> FabricResult<StepStatus> {
    let mut status = StepStatus::AlreadySatisfied;
    for dev in devs {
        let up = session
            .link(dev)?
            .is_some_and(|link| link.flags.iter().any(|f| f == "UP"));
        if !up {
            session.apply(&argv(&["ip", "link", "set", "dev", dev, "up"]))?;
            status = StepStatus::Applied;
        }
    }
    Ok(status)
}

/// Move the host's address off `base` and onto `sub`
pub fn ensure_address<S: Substrate + ?Sized>(
    session: &NodeSession<'_, S>,
    base: &str,
    sub: &str,
    address: InterfaceAddress,
) -> FabricResult<StepStatus> {
    let mut status = StepStatus::AlreadySatisfied;
    if session.addresses(base)?.iter().any(|info| info.family == "inet") {
        session.apply(&argv(&["ip", "addr", "flush", "dev", base]))?;
        status = StepStatus::Applied;
    }

    let wanted = address.address.to_string();
    let present = session
        .addresses(sub)?
        .iter()
        .any(|info| info.local == wanted && info.prefixlen == address.prefix_len);
    if !present {
        let add = argv(&["ip", "addr", "add", &address.to_string(), "dev", sub]);
        if session.create(&add)? == StepStatus::Applied {
            status = StepStatus::Applied;
        }
    }
    Ok(status)
}

pub fn ensure_default_route<S: Substrate + ?Sized>(
    session: &NodeSession<'_, S>,
    sub: &str,
) -> FabricResult<StepStatus> {
    let routes: Option<Vec<IpRoute>> =
        session.query(&argv(&["ip", "-j", "route", "show", "default"]))?;
    let defaults: Vec<IpRoute> =
        routes.into_iter().flatten().filter(|r| r.dst == "default").collect();
    if defaults.iter().any(|r| r.dev.as_deref() == Some(sub)) {
        return Ok(StepStatus::AlreadySatisfied);
    }

    let status = session.create(&argv(&["ip", "route", "add", "default", "dev", sub]))?;
    if status == StepStatus::AlreadySatisfied {
        // The route that blocked the add does not go via `sub`
        let foreign = defaults
            .iter()
            .find_map(|r| r.dev.as_deref())
            .unwrap_or("another device");
        warn!(
            "[{}] default route via {} left in place instead of {}",
            session.node.name, foreign, sub
        );
        return Ok(StepStatus::LeftInPlace);
    }
    Ok(status)
}

/// Set the VLAN access tag of `port`; runs on the switch, not the host
pub fn ensure_port_tag<S: Substrate + ?Sized>(
    session: &NodeSession<'_, S>,
    port: &str,
    vlan: VlanId,
) -> FabricResult<StepStatus> {
    let get = argv(&["ovs-vsctl", "get", "Port", port, "tag"]);
    let current = session.run(&get)?;
    if !current.success() {
        return Err(session.failure(&get, &current));
    }
    if current.stdout.trim() == vlan.to_string() {
        return Ok(StepStatus::AlreadySatisfied);
    }
    session.apply(&argv(&["ovs-vsctl", "set", "Port", port, &format!("tag={}", vlan)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{Fault, LinkHandle, NodeAttrs, PortRef, RecordingSubstrate};
    use crate::topology::LinkAttrs;

    const T: Duration = Duration::from_secs(1);

    fn substrate() -> (RecordingSubstrate, NodeHandle, NodeHandle) {
        let mut sub = RecordingSubstrate::new();
        let sw = sub.add_switch("l1", &NodeAttrs::default()).unwrap();
        let host = sub.add_host("h1_2_v200", &NodeAttrs::default()).unwrap();
        let _: LinkHandle = sub
            .add_link(
                &PortRef { node: sw.clone(), interface: "l1-eth4".into() },
                &PortRef { node: host.clone(), interface: "eth0".into() },
                &LinkAttrs::default(),
            )
            .unwrap();
        (sub, sw, host)
    }

    fn address() -> InterfaceAddress {
        InterfaceAddress { address: "10.2.1.2".parse().unwrap(), prefix_len: 24 }
    }

    #[test]
    fn test_steps_are_idempotent() {
        let (sub, sw, host) = substrate();
        let vlan = VlanId::new(200).unwrap();
        let addr = address();
        let on_host = NodeSession::new(&sub, &host, T);
        let on_switch = NodeSession::new(&sub, &sw, T);
        let applied = StepStatus::Applied;
        let satisfied = StepStatus::AlreadySatisfied;

        assert_eq!(ensure_subinterface(&on_host, "eth0", vlan).unwrap(), applied);
        assert_eq!(ensure_up(&on_host, &["eth0", "eth0.200"]).unwrap(), applied);
        assert_eq!(ensure_address(&on_host, "eth0", "eth0.200", addr).unwrap(), applied);
        assert_eq!(ensure_default_route(&on_host, "eth0.200").unwrap(), applied);
        assert_eq!(ensure_port_tag(&on_switch, "l1-eth4", vlan).unwrap(), applied);

        assert_eq!(ensure_subinterface(&on_host, "eth0", vlan).unwrap(), satisfied);
        assert_eq!(ensure_up(&on_host, &["eth0", "eth0.200"]).unwrap(), satisfied);
        assert_eq!(ensure_address(&on_host, "eth0", "eth0.200", addr).unwrap(), satisfied);
        assert_eq!(ensure_default_route(&on_host, "eth0.200").unwrap(), satisfied);
        assert_eq!(ensure_port_tag(&on_switch, "l1-eth4", vlan).unwrap(), satisfied);

        assert_eq!(sub.addresses("h1_2_v200", "eth0.200"), vec!["10.2.1.2/24".to_string()]);
        assert_eq!(sub.port_tag("l1", "l1-eth4"), Some(200));
    }

    #[test]
    fn test_foreign_default_route_is_left_in_place() {
        let (sub, _, host) = substrate();
        let session = NodeSession::new(&sub, &host, T);
        // Another default route already present: the add reports "File exists"
        sub.exec(&host, &argv(&["ip", "route", "add", "default", "dev", "eth0"]), T).unwrap();
        let vlan = VlanId::new(200).unwrap();
        ensure_subinterface(&session, "eth0", vlan).unwrap();

        let status = ensure_default_route(&session, "eth0.200").unwrap();
        assert_eq!(status, StepStatus::LeftInPlace);
        assert_eq!(sub.default_route("h1_2_v200").as_deref(), Some("eth0"));
    }

    #[test]
    fn test_failed_command_is_external_failure() {
        let (mut sub, _, host) = substrate();
        sub.inject("h1_2_v200", Fault::FailCommand("link add".into()));
        let session = NodeSession::new(&sub, &host, T);

        let err = ensure_subinterface(&session, "eth0", VlanId::new(200).unwrap()).unwrap_err();
        match err {
            FabricError::ExternalCommandFailure { exit_code, ref output, .. } => {
                assert_eq!(exit_code, 1);
                assert_eq!(output, "injected failure");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_failed_address_query_is_not_treated_as_empty() {
        let (mut sub, _, host) = substrate();
        let stale = argv(&["ip", "addr", "add", "192.168.9.9/24", "dev", "eth0"]);
        sub.exec(&host, &stale, T).unwrap();
        sub.inject("h1_2_v200", Fault::FailCommand("-j addr show dev eth0".into()));
        let session = NodeSession::new(&sub, &host, T);

        let err = ensure_address(&session, "eth0", "eth0.200", address()).unwrap_err();
        assert!(matches!(err, FabricError::ExternalCommandFailure { .. }), "{:?}", err);
        assert_eq!(sub.addresses("h1_2_v200", "eth0"), vec!["192.168.9.9/24".to_string()]);
    }

    #[test]
    fn test_missing_device_query_reads_as_absent() {
        let (sub, _, host) = substrate();
        let session = NodeSession::new(&sub, &host, T);
        assert!(session.link("eth0.300").unwrap().is_none());
        assert!(session.addresses("eth0.300").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_port_fails_tagging() {
        let (sub, sw, _) = substrate();
        let session = NodeSession::new(&sub, &sw, T);
        assert!(matches!(
            ensure_port_tag(&session, "l1-eth9", VlanId::new(100).unwrap()),
            Err(FabricError::ExternalCommandFailure { .. })
        ));
    }
}
