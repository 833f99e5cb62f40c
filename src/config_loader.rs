use std::fs::File;
use std::path::Path;

use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use log::{info, warn};

use crate::config::FabricConfig;
use crate::error::{FabricError, FabricResult};
use crate::topology::{ClosShape, LinkAttrs, ShapeParams, TreeShape};
use crate::utils::bandwidth::Bandwidth;
use crate::utils::duration::parse_delay;

/// Load and parse a fabric configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<FabricConfig> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open config file {}", config_path.display()))?;

    let config: FabricConfig = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse config file {}", config_path.display()))?;

    config.validate()?;

    info!("Detected {:?} fabric", config.topology.kind());
    Ok(config)
}

/// Resolve the fabric from either a config file or a topology string
pub fn load_fabric(config_path: Option<&Path>, topo: Option<&str>) -> Result<FabricConfig> {
    match (config_path, topo) {
        (Some(path), None) => load_config(path),
        (None, Some(spec)) => {
            let config = FabricConfig::from_shape(parse_topo_spec(spec)?);
            config.validate()?;
            Ok(config)
        }
        (Some(_), Some(_)) => bail!("--config and --topo are mutually exclusive"),
        (None, None) => bail!("either --config or --topo is required"),
    }
}

/// Parse a Mininet-style topology string
///
/// `tree,fanout=3,d1=10ms,d2=20ms,d3=10ms` or
/// `clos,spines=2,leaves=3,hosts_per_leaf=4,core_bw=10,host_delay=5ms`.
/// `canvas` is accepted as another name for `clos`. Unset keys keep their
/// defaults; bandwidths without a unit are Mbit/s and delays without a
/// unit are milliseconds.
pub fn parse_topo_spec(spec: &str) -> FabricResult<ShapeParams> {
    let mut parts = spec.split(',').map(str::trim).filter(|p| !p.is_empty());
    let kind = parts
        .next()
        .ok_or_else(|| FabricError::invalid("empty topology string"))?;

    let mut pairs = Vec::new();
    for part in parts {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| FabricError::invalid(format!("expected key=value, got '{}'", part)))?;
        pairs.push((key.trim(), value.trim()));
    }

    match kind {
        "tree" => parse_tree(&pairs).map(ShapeParams::Tree),
        "clos" | "canvas" => parse_clos(&pairs).map(ShapeParams::Clos),
        other => Err(FabricError::invalid(format!(
            "unknown topology '{}', expected tree or clos",
            other
        ))),
    }
}

fn parse_count(key: &str, value: &str) -> FabricResult<u32> {
    value.parse().map_err(|_| {
        FabricError::invalid(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

fn set_delay(attrs: &mut LinkAttrs, key: &str, value: &str) -> FabricResult<()> {
    let delay = parse_delay(value).map_err(|e| FabricError::invalid(format!("{}: {}", key, e)))?;
    attrs.delay = Some(delay);
    Ok(())
}

fn set_bandwidth(attrs: &mut LinkAttrs, key: &str, value: &str) -> FabricResult<()> {
    let bw: Bandwidth = value.parse().map_err(|e| FabricError::invalid(format!("{}: {}", key, e)))?;
    attrs.bandwidth = Some(bw);
    Ok(())
}

fn parse_tree(pairs: &[(&str, &str)]) -> FabricResult<TreeShape> {
    let mut shape = TreeShape::default();
    for &(key, value) in pairs {
        match key {
            "fanout" => shape.fanout = parse_count(key, value)?,
            "d1" => set_delay(&mut shape.root_link, key, value)?,
            "d2" => set_delay(&mut shape.aggregation_link, key, value)?,
            "d3" => set_delay(&mut shape.host_link, key, value)?,
            "bw1" => set_bandwidth(&mut shape.root_link, key, value)?,
            "bw2" => set_bandwidth(&mut shape.aggregation_link, key, value)?,
            "bw3" => set_bandwidth(&mut shape.host_link, key, value)?,
            _ => return Err(FabricError::invalid(format!("unknown tree parameter '{}'", key))),
        }
    }
    Ok(shape)
}

fn parse_clos(pairs: &[(&str, &str)]) -> FabricResult<ClosShape> {
    let mut shape = ClosShape::default();
    for &(key, value) in pairs {
        match key {
            "spines" => shape.spines = parse_count(key, value)?,
            "leaves" => shape.leaves = parse_count(key, value)?,
            "hosts_per_leaf" => shape.hosts_per_leaf = parse_count(key, value)?,
            "core_bw" => set_bandwidth(&mut shape.core_link, key, value)?,
            "core_delay" => set_delay(&mut shape.core_link, key, value)?,
            "host_bw" => set_bandwidth(&mut shape.host_link, key, value)?,
            "host_delay" => set_delay(&mut shape.host_link, key, value)?,
            // Accepted for compatibility; a spine-leaf fabric has no leaf-to-leaf links
            "leaf_bw" | "leaf_delay" => warn!("Ignoring unused topology parameter '{}'", key),
            _ => return Err(FabricError::invalid(format!("unknown clos parameter '{}'", key))),
        }
    }
    Ok(shape)
}
