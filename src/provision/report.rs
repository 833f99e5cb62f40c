//! Provisioning report generation.
//!
//! Generates a JSON report and a short human-readable summary.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::Serialize;

use super::{Outcome, ProvisioningResult};
use crate::topology::TopologySummary;

/// Outcome of one `up` run
#[derive(Debug, Serialize)]
pub struct FabricReport {
    /// RFC 3339 timestamp
    pub generated_at: String,
    pub topology: TopologySummary,
    pub provisioned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<ProvisioningResult>,
}

impl FabricReport {
    pub fn new(topology: TopologySummary, results: Vec<ProvisioningResult>) -> Self {
        let failed = results.iter().filter(|r| r.is_failed()).count();
        let skipped = results.iter().filter(|r| matches!(r.outcome, Outcome::Skipped)).count();
        FabricReport {
            generated_at: chrono::Utc::now().to_rfc3339(),
            topology,
            provisioned: results.len() - failed - skipped,
            failed,
            skipped,
            results,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Generate JSON report
pub fn generate_json_report(report: &FabricReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Print a summary to stdout
pub fn print_summary(report: &FabricReport) {
    println!("\n=== FABRIC SUMMARY ===\n");
    println!(
        "Topology: {:?} with {} switches, {} hosts, {} links",
        report.topology.kind, report.topology.switches, report.topology.hosts, report.topology.links
    );
    println!(
        "Hosts: {} provisioned, {} failed, {} skipped",
        report.provisioned, report.failed, report.skipped
    );

    if report.has_failures() {
        println!("\nFailures:");
        for result in report.results.iter().filter(|r| r.is_failed()) {
            if let Outcome::Failed { kind, message } = &result.outcome {
                println!("  {} ({:?}): {}", result.host, kind, message);
            }
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::identity::{InterfaceAddress, VlanId};
    use crate::topology::FabricKind;

    fn result(host: &str, outcome: Outcome) -> ProvisioningResult {
        ProvisioningResult {
            host: host.to_string(),
            vlan: VlanId::new(100).unwrap(),
            address: InterfaceAddress { address: "10.1.1.1".parse().unwrap(), prefix_len: 24 },
            switch_port: None,
            outcome,
        }
    }

    #[test]
    fn test_report_counts_and_file() {
        let summary = TopologySummary { kind: FabricKind::Clos, switches: 5, hosts: 3, links: 9 };
        let report = FabricReport::new(
            summary,
            vec![
                result("h1_1_v100", Outcome::Provisioned { steps: Vec::new() }),
                result(
                    "h1_2_v200",
                    Outcome::Failed {
                        kind: ErrorKind::PeerNotFound,
                        message: "No access switch".into(),
                    },
                ),
                result("h1_3_v300", Outcome::Skipped),
            ],
        );
        assert_eq!((report.provisioned, report.failed, report.skipped), (1, 1, 1));
        assert!(report.has_failures());
        assert!(chrono::DateTime::parse_from_rfc3339(&report.generated_at).is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        generate_json_report(&report, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["topology"]["kind"], "clos");
        assert_eq!(json["results"][1]["status"], "failed");
        assert_eq!(json["results"][1]["kind"], "PeerNotFound");
    }
}
