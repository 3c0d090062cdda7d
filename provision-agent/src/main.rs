// SPDX-License-Identifier: GPL-3.0-only

//! Provisioning agent - writes a node's disk layout, images and bootloader
//!
//! Runs on the node being provisioned, as root, one stage per invocation or
//! the whole pipeline at once.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use provision_agent::{AgentConfig, Manager, load_driver};
use provision_layout::DriverKind;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "provision-agent")]
#[command(about = "Partition disks, write images and install the bootloader on a node")]
struct AgentCli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Node description (JSON)
    #[arg(long, short)]
    input: PathBuf,
    /// Overrides `data_driver` from the configuration
    #[arg(long, value_enum)]
    data_driver: Option<DriverArg>,
    #[arg(long, short)]
    verbose: bool,
    #[command(subcommand)]
    command: AgentCommand,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DriverArg {
    Nailgun,
    Simple,
    BuildImage,
}

impl From<DriverArg> for DriverKind {
    fn from(arg: DriverArg) -> Self {
        match arg {
            DriverArg::Nailgun => Self::Nailgun,
            DriverArg::Simple => Self::Simple,
            DriverArg::BuildImage => Self::BuildImage,
        }
    }
}

#[derive(Debug, Subcommand)]
enum AgentCommand {
    Partition,
    Configdrive,
    Copyimage,
    Bootloader,
    /// Every stage in order
    Provision,
    BuildImage,
    Reboot,
}

fn main() -> Result<()> {
    let cli = AgentCli::parse();

    let fallback = if cli.verbose {
        "debug"
    } else {
        "provision_agent=info,provision_sys=info,warn"
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        "Starting provisioning agent v{}",
        env!("CARGO_PKG_VERSION")
    );

    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("Provisioning agent must run as root");
        anyhow::bail!("Agent must run with root privileges");
    }

    let config = AgentConfig::load(cli.config.as_deref())?;
    let kind = cli.data_driver.map(DriverKind::from).unwrap_or(config.data_driver);

    let raw = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input {}", cli.input.display()))?;

    let tools = provision_sys::system_toolbox(config.system_settings());
    let driver = load_driver(kind, &raw, &tools, &config)?;
    let mut manager = Manager::new(driver, tools, config);

    match cli.command {
        AgentCommand::Partition => manager.do_partitioning()?,
        AgentCommand::Configdrive => manager.do_configdrive()?,
        AgentCommand::Copyimage => manager.do_copyimage()?,
        AgentCommand::Bootloader => manager.do_bootloader()?,
        AgentCommand::Provision => manager.do_provisioning()?,
        AgentCommand::BuildImage => manager.do_build_image()?,
        AgentCommand::Reboot => manager.do_reboot()?,
    }

    tracing::info!("Done");
    Ok(())
}
