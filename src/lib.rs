//! # Fabricsim - Emulated data-center fabrics with VLAN host provisioning
//!
//! This library builds switch/host graphs for emulated data-center networks
//! and applies per-host addressing and VLAN state once the fabric is live.
//!
//! ## Overview
//!
//! Two fabric shapes are supported:
//!
//! - **Tree**: a root switch, `fanout` aggregation switches, `fanout²` access
//!   switches and `fanout³` hosts, with a delay per tier
//! - **Clos**: spine and leaf switches joined by a full mesh, a fixed number
//!   of hosts per leaf, and hosts spread round robin over a VLAN plan
//!
//! Every name, MAC and address is derived from a node's position, so
//! building the same shape twice yields the same fabric.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `identity`: switch/host naming, MACs, VLAN ids and address derivation
//! - `topology`: graph types, the tree and Clos builders, and access port resolution
//! - `substrate`: the emulation boundary, with Linux (OVS + netns) and in-memory backends
//! - `provision`: idempotent per-host VLAN provisioning and reports
//! - `config` / `config_loader`: YAML fabric files and Mininet-style topology strings
//! - `orchestrator`: high-level plan, bring-up and teardown
//! - `utils`: delay and bandwidth parsing
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use fabricsim::{config_loader, orchestrator, substrate::RecordingSubstrate};
//!
//! let config = config_loader::load_fabric(None, Some("clos,spines=2,leaves=3,hosts_per_leaf=4"))?;
//! let topology = orchestrator::plan(&config)?;
//!
//! let mut substrate = RecordingSubstrate::new();
//! let report = orchestrator::bring_up(&config, &topology, &mut substrate)?;
//! assert_eq!(report.failed, 0);
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! general:
//!   log_level: info
//!   command_timeout: 3s
//! controller:
//!   ip: 127.0.0.1
//!   port: 6653
//! switch:
//!   protocol: OpenFlow13
//! topology:
//!   type: clos
//!   spines: 2
//!   leaves: 3
//!   hosts_per_leaf: 4
//! ```
//!
//! ## Error Handling
//!
//! Domain errors are `error::FabricError`. Construction errors abort a run;
//! provisioning errors are recorded per host. Orchestration functions return
//! `color_eyre::eyre::Result` with context attached.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod provision;
pub mod substrate;
pub mod topology;
pub mod utils;
