//! Host network provisioning.
//!
//! For every VLAN host, in build order: create `<base>.<vlan>`, bring both
//! interfaces up, move the address onto the subinterface, install a default
//! route through it, and tag the host's access port on its switch. Hosts
//! are provisioned concurrently on a bounded worker pool. A failing host is
//! recorded in its own result and never stops the others.

pub mod report;
pub mod steps;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{ErrorKind, FabricError, FabricResult};
use crate::identity::{InterfaceAddress, VlanId};
use crate::substrate::{NodeHandle, Substrate};
use crate::topology::{find_access_port, AccessPort, Node, Topology};

pub use report::{generate_json_report, print_summary, FabricReport};
pub use steps::{Step, StepReport, StepStatus};

use steps::{
    ensure_address, ensure_default_route, ensure_port_tag, ensure_subinterface, ensure_up,
    subinterface_name, NodeSession,
};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_WORKERS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOptions {
    /// Bound on each external command
    pub command_timeout: Duration,
    /// Upper limit on concurrently provisioned hosts
    pub max_workers: usize,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        ProvisionOptions {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Provisioned { steps: Vec<StepReport> },
    Failed { kind: ErrorKind, message: String },
    /// Not started because shutdown was requested
    Skipped,
}

/// What happened to one host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisioningResult {
    pub host: String,
    pub vlan: VlanId,
    pub address: InterfaceAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switch_port: Option<AccessPort>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ProvisioningResult {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Provisioned { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.outcome {
            Outcome::Failed { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// A VLAN host with the identity it is provisioned with
#[derive(Clone, Copy)]
struct HostJob<'t> {
    node: &'t Node,
    vlan: VlanId,
    address: InterfaceAddress,
}

/// Applies host addressing and VLAN state to a live substrate
pub struct Provisioner<'a, S: Substrate + ?Sized> {
    topology: &'a Topology,
    substrate: &'a S,
    options: ProvisionOptions,
    shutdown: Arc<AtomicBool>,
}

impl<'a, S: Substrate + ?Sized> Provisioner<'a, S> {
    pub fn new(topology: &'a Topology, substrate: &'a S, options: ProvisionOptions) -> Self {
        Provisioner {
            topology,
            substrate,
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops hosts not yet started from being provisioned
    ///
    /// Hosts already in flight run to completion or to their command timeout.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Provision every VLAN host; results come back in build order
    pub fn provision_all(&self) -> Vec<ProvisioningResult> {
        let hosts: Vec<HostJob<'_>> = self
            .topology
            .hosts()
            .filter_map(|node| {
                let params = node.as_host()?;
                Some(HostJob { node, vlan: params.vlan()?, address: params.address })
            })
            .collect();
        if hosts.is_empty() {
            info!("No VLAN hosts to provision");
            return Vec::new();
        }

        let workers = self.options.max_workers.clamp(1, hosts.len());
        info!("Provisioning {} hosts with {} workers", hosts.len(), workers);

        let work = |job: &HostJob<'_>| self.provision_one(job);
        let results: Vec<ProvisioningResult> = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("provision-{}", i))
            .build()
        {
            Ok(pool) => pool.install(|| hosts.par_iter().map(&work).collect()),
            Err(e) => {
                warn!("Could not start worker pool ({}), provisioning sequentially", e);
                hosts.iter().map(&work).collect()
            }
        };

        let failed = results.iter().filter(|r| r.is_failed()).count();
        let skipped = results.iter().filter(|r| matches!(r.outcome, Outcome::Skipped)).count();
        info!(
            "Provisioning finished: {} ok, {} failed, {} skipped",
            results.len() - failed - skipped,
            failed,
            skipped
        );
        results
    }

    fn provision_one(&self, job: &HostJob<'_>) -> ProvisioningResult {
        let HostJob { node, vlan, address } = *job;
        let mut result = ProvisioningResult {
            host: node.name.clone(),
            vlan,
            address,
            switch_port: None,
            outcome: Outcome::Skipped,
        };

        if self.shutdown.load(Ordering::SeqCst) {
            debug!("Shutdown requested, skipping {}", node.name);
            return result;
        }

        // The access port is a pure lookup; resolve it before touching live state
        let port = match find_access_port(&node.name, self.topology) {
            Ok(port) => port,
            Err(e) => return self.failed(result, e),
        };
        result.switch_port = Some(port.clone());

        match self.apply_steps(node, vlan, address, &port) {
            Ok(steps) => {
                info!(
                    "{} VLAN {} -> {} (leaf {} port {})",
                    node.name, vlan, address, port.switch_name, port.switch_interface
                );
                result.outcome = Outcome::Provisioned { steps };
                result
            }
            Err(e) => self.failed(result, e),
        }
    }

    fn failed(&self, mut result: ProvisioningResult, error: FabricError) -> ProvisioningResult {
        warn!("Provisioning {} failed: {}", result.host, error);
        result.outcome = Outcome::Failed { kind: error.kind(), message: error.to_string() };
        result
    }

    fn apply_steps(
        &self,
        node: &Node,
        vlan: VlanId,
        address: InterfaceAddress,
        port: &AccessPort,
    ) -> FabricResult<Vec<StepReport>> {
        let timeout = self.options.command_timeout;
        let host = NodeHandle::of(node);
        let switch = NodeHandle::switch(&port.switch_name);
        let on_host = NodeSession::new(self.substrate, &host, timeout);
        let on_switch = NodeSession::new(self.substrate, &switch, timeout);

        let base = self.substrate.default_interface_name(&host)?;
        let sub = subinterface_name(&base, vlan);

        let mut reports = Vec::with_capacity(5);
        let mut record = |step: Step, status: StepStatus| reports.push(StepReport { step, status });

        record(Step::CreateSubinterface, ensure_subinterface(&on_host, &base, vlan)?);
        record(Step::LinkUp, ensure_up(&on_host, &[base.as_str(), sub.as_str()])?);
        record(Step::AssignAddress, ensure_address(&on_host, &base, &sub, address)?);
        record(Step::DefaultRoute, ensure_default_route(&on_host, &sub)?);
        record(Step::TagAccessPort, ensure_port_tag(&on_switch, &port.switch_interface, vlan)?);

        Ok(reports)
    }
}

/// Provision every VLAN host of `topology` on `substrate`
pub fn provision_all<S: Substrate + ?Sized>(
    topology: &Topology,
    substrate: &S,
    options: &ProvisionOptions,
) -> Vec<ProvisioningResult> {
    Provisioner::new(topology, substrate, options.clone()).provision_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::command::argv;
    use crate::substrate::{instantiate, Fault, RecordingSubstrate};
    use crate::topology::{build, BuildOptions, ClosShape, ShapeParams, TreeShape};

    fn clos() -> Topology {
        build(&ShapeParams::Clos(ClosShape::default()), &BuildOptions::default()).unwrap()
    }

    #[test]
    fn test_provisions_every_vlan_host_in_order() {
        let topo = clos();
        let mut substrate = RecordingSubstrate::new();
        instantiate(&topo, &mut substrate).unwrap();

        let results = provision_all(&topo, &substrate, &ProvisionOptions::default());
        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(results[0].host, "h1_1_v100");
        assert_eq!(results[11].host, "h3_4_v400");

        let r = results.iter().find(|r| r.host == "h2_3_v300").unwrap();
        let port = r.switch_port.as_ref().unwrap();
        assert_eq!(port.switch_name, "l2");
        assert_eq!(substrate.port_tag("l2", &port.switch_interface), Some(300));
        assert_eq!(substrate.addresses("h2_3_v300", "eth0.300"), vec!["10.3.2.3/24".to_string()]);
        assert_eq!(substrate.default_route("h2_3_v300").as_deref(), Some("eth0.300"));
        assert!(substrate.is_up("h2_3_v300", "eth0.300"));
    }

    #[test]
    fn test_second_pass_is_already_satisfied() {
        let topo = clos();
        let mut substrate = RecordingSubstrate::new();
        instantiate(&topo, &mut substrate).unwrap();
        let options = ProvisionOptions { max_workers: 4, ..ProvisionOptions::default() };

        provision_all(&topo, &substrate, &options);
        let again = provision_all(&topo, &substrate, &options);
        assert!(again.iter().all(|r| r.is_ok()));
        for result in &again {
            match &result.outcome {
                Outcome::Provisioned { steps } => {
                    let satisfied = steps.iter().all(|s| s.status == StepStatus::AlreadySatisfied);
                    assert!(satisfied, "{:?}", result);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_failures_are_isolated() {
        let topo = clos();
        let mut substrate = RecordingSubstrate::new();
        instantiate(&topo, &mut substrate).unwrap();
        substrate.inject("h1_2_v200", Fault::Hang);
        substrate.inject("h2_1_v100", Fault::Fail);

        let results = provision_all(&topo, &substrate, &ProvisionOptions::default());
        assert_eq!(results.len(), 12);
        assert_eq!(results.iter().filter(|r| r.is_failed()).count(), 2);
        assert_eq!(results[1].error_kind(), Some(ErrorKind::ProvisioningTimeout));
        assert_eq!(results[4].error_kind(), Some(ErrorKind::ExternalCommandFailure));
        // The port was resolved before the host failed
        assert!(results[1].switch_port.is_some());
    }

    #[test]
    fn test_failed_base_address_query_fails_the_host() {
        let shape = ClosShape { spines: 1, leaves: 1, hosts_per_leaf: 1, ..ClosShape::default() };
        let topo = build(&ShapeParams::Clos(shape), &BuildOptions::default()).unwrap();
        let mut substrate = RecordingSubstrate::new();
        instantiate(&topo, &mut substrate).unwrap();

        let host = NodeHandle::host("h1_1_v100");
        let stale = argv(&["ip", "addr", "add", "192.168.9.9/24", "dev", "eth0"]);
        substrate.exec(&host, &stale, Duration::from_secs(1)).unwrap();
        substrate.inject("h1_1_v100", Fault::FailCommand("-j addr show dev eth0".into()));

        let results = provision_all(&topo, &substrate, &ProvisionOptions::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error_kind(), Some(ErrorKind::ExternalCommandFailure));
        assert_eq!(substrate.addresses("h1_1_v100", "eth0"), vec!["192.168.9.9/24".to_string()]);
    }

    #[test]
    fn test_shutdown_skips_unstarted_hosts() {
        let topo = clos();
        let mut substrate = RecordingSubstrate::new();
        instantiate(&topo, &mut substrate).unwrap();

        let provisioner = Provisioner::new(&topo, &substrate, ProvisionOptions::default());
        provisioner.shutdown_handle().store(true, Ordering::SeqCst);
        let results = provisioner.provision_all();
        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|r| r.outcome == Outcome::Skipped));
        assert!(substrate.commands_on("h1_1_v100").iter().all(|c| !c.starts_with("ip ")));
    }

    #[test]
    fn test_tree_hosts_are_not_vlan_provisioned() {
        let shape = ShapeParams::Tree(TreeShape { fanout: 2, ..TreeShape::default() });
        let topo = build(&shape, &BuildOptions::default()).unwrap();
        let substrate = RecordingSubstrate::new();
        assert!(provision_all(&topo, &substrate, &ProvisionOptions::default()).is_empty());
    }

    #[test]
    fn test_result_serializes_status() {
        let topo = clos();
        let mut substrate = RecordingSubstrate::new();
        instantiate(&topo, &mut substrate).unwrap();
        let results = provision_all(&topo, &substrate, &ProvisionOptions::default());

        let json = serde_json::to_value(&results[0]).unwrap();
        assert_eq!(json["status"], "provisioned");
        assert_eq!(json["vlan"], 100);
        assert_eq!(json["address"], "10.1.1.1/24");
        assert_eq!(json["switch_port"]["switch"], "l1");
        assert_eq!(json["steps"][0]["step"], "create_subinterface");
    }
}
