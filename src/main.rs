use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use fabricsim::config::{ControllerConfig, FabricConfig};
use fabricsim::identity::SwitchTier;
use fabricsim::provision::{generate_json_report, print_summary};
use fabricsim::substrate::{LinuxSubstrate, RecordingSubstrate};
use fabricsim::topology::TopologyPlan;
use fabricsim::{config_loader, orchestrator};

/// Emulated data-center fabrics with VLAN host provisioning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Where the fabric description comes from
#[derive(Args, Debug)]
struct FabricSource {
    /// Path to the fabric configuration YAML file
    #[arg(short, long, conflicts_with = "topo", required_unless_present = "topo")]
    config: Option<PathBuf>,

    /// Topology string, e.g. "clos,spines=2,leaves=3,hosts_per_leaf=4"
    #[arg(short, long)]
    topo: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the graph and write nodes, links and addressing as JSON
    Plan {
        #[command(flatten)]
        source: FabricSource,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Instantiate the fabric and provision its hosts
    Up {
        #[command(flatten)]
        source: FabricSource,

        /// Use the in-memory substrate instead of the Linux one
        #[arg(long)]
        dry_run: bool,

        /// Write the provisioning report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Remote controller as IP:PORT
        #[arg(long)]
        controller: Option<ControllerConfig>,

        /// Attach only these switch tiers to the controller, e.g. "spine"
        #[arg(long, value_delimiter = ',')]
        controller_tiers: Vec<SwitchTier>,

        /// Bound on each external command, e.g. "3s"
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Upper limit on hosts provisioned at once
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Remove the fabric's switches and hosts from the Linux substrate
    Down {
        #[command(flatten)]
        source: FabricSource,
    },
}

impl Command {
    fn source(&self) -> &FabricSource {
        match self {
            Command::Plan { source, .. }
            | Command::Up { source, .. }
            | Command::Down { source } => source,
        }
    }
}

fn load(source: &FabricSource) -> Result<FabricConfig> {
    config_loader::load_fabric(source.config.as_deref(), source.topo.as_deref())
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();

    // Loaded before logging starts so the file's log level can apply
    let mut config = load(cli.command.source())?;

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.general.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    info!("Starting fabricsim {}", env!("CARGO_PKG_VERSION"));
    info!("Fabric: {:?}", config.topology.kind());

    match cli.command {
        Command::Plan { output, .. } => {
            let topology = orchestrator::plan(&config)?;
            let json = TopologyPlan::new(&topology)
                .to_json()
                .wrap_err("Failed to serialize plan to JSON")?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .wrap_err_with(|| format!("Failed to write plan to {}", path.display()))?;
                    info!("Plan written to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Command::Up {
            dry_run,
            report,
            controller,
            controller_tiers,
            timeout,
            workers,
            ..
        } => {
            if let Some(controller) = controller {
                config.controller = Some(controller);
            }
            if !controller_tiers.is_empty() {
                match config.controller.as_mut() {
                    Some(controller) => controller.tiers = Some(controller_tiers),
                    None => bail!("--controller-tiers needs a controller"),
                }
            }
            if let Some(timeout) = timeout {
                config.general.command_timeout = timeout;
            }
            if let Some(workers) = workers {
                config.general.max_workers = workers;
            }
            config.validate()?;

            let topology = orchestrator::plan(&config)?;
            let fabric_report = if dry_run {
                info!("Dry run: using the in-memory substrate");
                let mut substrate = RecordingSubstrate::new();
                let fabric_report = orchestrator::bring_up(&config, &topology, &mut substrate)?;
                for cmd in substrate.commands() {
                    debug!("[{}] {}", cmd.node, cmd.command);
                }
                fabric_report
            } else {
                let mut substrate = LinuxSubstrate::new(config.general.command_timeout);
                orchestrator::bring_up(&config, &topology, &mut substrate)?
            };

            print_summary(&fabric_report);
            if let Some(path) = report {
                generate_json_report(&fabric_report, &path)?;
            }
            if fabric_report.has_failures() {
                warn!("{} hosts failed to provision", fabric_report.failed);
                std::process::exit(1);
            }
        }
        Command::Down { .. } => {
            let topology = orchestrator::plan(&config)?;
            let mut substrate = LinuxSubstrate::new(config.general.command_timeout);
            orchestrator::tear_down(&topology, &mut substrate)?;
        }
    }

    info!("Done");
    Ok(())
}
