//! Network topology module.
//!
//! This module contains the switch/host graph, the builders for tree and
//! spine-leaf fabrics, and the resolver that maps a host to its access port.

pub mod builder;
pub mod plan;
pub mod resolver;
pub mod types;

// Re-export key types and functions for easier access
pub use builder::{
    build, build_clos, build_tree, verify_invariants, BuildOptions, ClosShape, ShapeParams,
    TreeShape,
};
pub use plan::TopologyPlan;
pub use resolver::{find_access_port, AccessPort};
pub use types::{
    Endpoint, FabricKind, HostParams, Link, LinkAttrs, LinkId, LinkRole, Node, NodeId, NodeKind,
    SwitchParams, Topology, TopologySummary,
};
