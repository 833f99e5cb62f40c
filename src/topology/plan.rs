//! Serializable view of a built topology.
//!
//! Used by `fabricsim plan` to show the graph and every derived identity
//! before anything is instantiated.

use serde::Serialize;

use super::types::{Endpoint, LinkAttrs, LinkRole, Node, Topology, TopologySummary};
use crate::identity::VlanId;

#[derive(Debug, Serialize)]
pub struct EndpointPlan<'a> {
    pub node: &'a str,
    pub interface: &'a str,
}

#[derive(Debug, Serialize)]
pub struct LinkPlan<'a> {
    pub upper: EndpointPlan<'a>,
    pub lower: EndpointPlan<'a>,
    pub role: LinkRole,
    #[serde(flatten)]
    pub attrs: &'a LinkAttrs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_vlan: Option<VlanId>,
}

#[derive(Debug, Serialize)]
pub struct TopologyPlan<'a> {
    pub summary: TopologySummary,
    pub nodes: &'a [Node],
    pub links: Vec<LinkPlan<'a>>,
}

impl<'a> TopologyPlan<'a> {
    pub fn new(topology: &'a Topology) -> Self {
        let endpoint = |end: &'a Endpoint| EndpointPlan {
            node: topology.node(end.node).name.as_str(),
            interface: end.interface.as_str(),
        };
        let links = topology
            .links()
            .iter()
            .map(|link| LinkPlan {
                upper: endpoint(&link.upper),
                lower: endpoint(&link.lower),
                role: link.role,
                attrs: &link.attrs,
                access_vlan: link.access_vlan,
            })
            .collect();

        TopologyPlan {
            summary: topology.summary(),
            nodes: topology.nodes(),
            links,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::builder::{build, BuildOptions, ClosShape, ShapeParams};

    #[test]
    fn test_plan_names_endpoints() {
        let shape = ShapeParams::Clos(ClosShape::default());
        let topo = build(&shape, &BuildOptions::default()).unwrap();
        let plan = TopologyPlan::new(&topo);
        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();

        assert_eq!(json["summary"]["hosts"], 12);
        assert_eq!(json["links"][0]["upper"]["node"], "s1");
        assert_eq!(json["links"][0]["lower"]["node"], "l1");
        assert_eq!(json["links"][0]["delay"], "1ms");
        assert_eq!(json["links"][0]["bandwidth"], "10Mbit");

        let last = &json["links"][17];
        assert_eq!(last["lower"]["node"], "h3_4_v400");
        assert_eq!(last["access_vlan"], 400);

        let host = json["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["name"] == "h2_3_v300")
            .unwrap();
        assert_eq!(host["kind"], "host");
        assert_eq!(host["address"], "10.3.2.3/24");
        assert_eq!(host["identity"]["vlan"], 300);
    }
}
