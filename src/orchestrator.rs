//! Fabric orchestrator.
//!
//! This module coordinates a run: build the graph from the configuration,
//! instantiate it on a substrate, attach switches to the controller, force
//! their protocol version, then provision the hosts.

use color_eyre::eyre::{Result, WrapErr};
use log::{debug, info};

use crate::config::FabricConfig;
use crate::error::FabricError;
use crate::provision::{FabricReport, Provisioner};
use crate::substrate::command::{argv, render};
use crate::substrate::{instantiate, teardown, NodeHandle, Substrate};
use crate::topology::{build, Topology};

/// Build the graph described by `config`
pub fn plan(config: &FabricConfig) -> Result<Topology> {
    let topology =
        build(&config.topology, &config.build_options()).wrap_err("Failed to build topology")?;
    Ok(topology)
}

/// Run one switch configuration command, failing on a nonzero exit
fn configure<S: Substrate + ?Sized>(
    substrate: &S,
    switch: &NodeHandle,
    command: Vec<String>,
    config: &FabricConfig,
) -> Result<()> {
    let output = substrate.exec(switch, &command, config.general.command_timeout)?;
    if !output.success() {
        return Err(FabricError::ExternalCommandFailure {
            node: switch.name.clone(),
            command: render(&command),
            exit_code: output.exit_code,
            output: output.diagnostic(),
        }
        .into());
    }
    Ok(())
}

/// Force the protocol version on every switch and attach the controller
///
/// Only switches whose tier the controller lists are attached; the others
/// are left without a controller.
pub fn configure_switches<S: Substrate + ?Sized>(
    config: &FabricConfig,
    topology: &Topology,
    substrate: &S,
) -> Result<()> {
    let mut attached = 0;
    for node in topology.switches() {
        let switch = NodeHandle::of(node);
        if let Some(protocol) = &config.switch.protocol {
            let protocols = format!("protocols={}", protocol);
            configure(
                substrate,
                &switch,
                argv(&["ovs-vsctl", "set", "bridge", &node.name, &protocols]),
                config,
            )
            .wrap_err_with(|| format!("Failed to set protocol on {}", node.name))?;
        }

        let Some(controller) = &config.controller else {
            continue;
        };
        let attach = node.as_switch().is_some_and(|params| controller.attaches(params.tier));
        if !attach {
            debug!("{} stays without a controller", node.name);
            continue;
        }
        configure(
            substrate,
            &switch,
            argv(&["ovs-vsctl", "set-controller", &node.name, &controller.target()]),
            config,
        )
        .wrap_err_with(|| format!("Failed to attach {} to controller", node.name))?;
        attached += 1;
    }

    if let Some(protocol) = &config.switch.protocol {
        info!("Forced {} on {} switches", protocol, topology.summary().switches);
    }
    if let Some(controller) = &config.controller {
        info!("{} switches attached to controller at {}", attached, controller.target());
    }
    Ok(())
}

/// Instantiate, configure and provision the fabric
///
/// Construction and switch configuration errors abort the run. Host
/// provisioning failures are only counted in the returned report.
pub fn bring_up<S: Substrate + ?Sized>(
    config: &FabricConfig,
    topology: &Topology,
    substrate: &mut S,
) -> Result<FabricReport> {
    instantiate(topology, substrate).wrap_err("Failed to instantiate fabric")?;
    configure_switches(config, topology, substrate)?;

    let results = Provisioner::new(topology, substrate, config.provision_options()).provision_all();
    Ok(FabricReport::new(topology.summary(), results))
}

/// Remove every node of the fabric from the substrate
pub fn tear_down<S: Substrate + ?Sized>(topology: &Topology, substrate: &mut S) -> Result<()> {
    teardown(topology, substrate).wrap_err("Failed to tear down fabric")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::identity::SwitchTier;
    use crate::substrate::{Fault, RecordingSubstrate};
    use crate::topology::{ClosShape, ShapeParams, TreeShape};

    fn clos_config() -> FabricConfig {
        let mut config = FabricConfig::from_shape(ShapeParams::Clos(ClosShape::default()));
        config.switch.protocol = Some("OpenFlow13".to_string());
        config.controller = Some("127.0.0.1:6653".parse::<ControllerConfig>().unwrap());
        config
    }

    #[test]
    fn test_bring_up_configures_switches_and_hosts() {
        let config = clos_config();
        let topology = plan(&config).unwrap();
        let mut substrate = RecordingSubstrate::new();

        let report = bring_up(&config, &topology, &mut substrate).unwrap();
        assert_eq!(report.provisioned, 12);
        assert!(!report.has_failures());

        for switch in ["s1", "s2", "l1", "l2", "l3"] {
            assert_eq!(substrate.protocols(switch).as_deref(), Some("OpenFlow13"));
            assert_eq!(substrate.controller(switch).as_deref(), Some("tcp:127.0.0.1:6653"));
        }
    }

    #[test]
    fn test_switch_failure_aborts() {
        let config = clos_config();
        let topology = plan(&config).unwrap();
        let mut substrate = RecordingSubstrate::new();
        substrate.inject("l2", Fault::FailCommand("set-controller".into()));

        let err = bring_up(&config, &topology, &mut substrate).unwrap_err();
        assert!(format!("{:#}", err).contains("l2"));
    }

    #[test]
    fn test_controller_attaches_only_listed_tiers() {
        let shape = ClosShape { spines: 2, leaves: 4, hosts_per_leaf: 2, ..ClosShape::default() };
        let mut config = FabricConfig::from_shape(ShapeParams::Clos(shape));
        let mut controller: ControllerConfig = "127.0.0.1:6633".parse().unwrap();
        controller.tiers = Some(vec![SwitchTier::Spine]);
        config.controller = Some(controller);
        let topology = plan(&config).unwrap();
        let mut substrate = RecordingSubstrate::new();

        let report = bring_up(&config, &topology, &mut substrate).unwrap();
        assert_eq!(report.provisioned, 8);
        for spine in ["s1", "s2"] {
            assert_eq!(substrate.controller(spine).as_deref(), Some("tcp:127.0.0.1:6633"));
        }
        for leaf in ["l1", "l2", "l3", "l4"] {
            assert_eq!(substrate.controller(leaf), None);
        }
    }

    #[test]
    fn test_tear_down_removes_nodes() {
        let shape = TreeShape { fanout: 2, ..TreeShape::default() };
        let config = FabricConfig::from_shape(ShapeParams::Tree(shape));
        let topology = plan(&config).unwrap();
        let mut substrate = RecordingSubstrate::new();
        bring_up(&config, &topology, &mut substrate).unwrap();
        assert!(substrate.has_node("s0"));

        tear_down(&topology, &mut substrate).unwrap();
        assert!(!substrate.has_node("s0"));
        assert!(!substrate.has_node("host_8"));
    }
}
