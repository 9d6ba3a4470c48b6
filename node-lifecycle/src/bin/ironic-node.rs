// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator CLI for enrolling, reconfiguring and removing Ironic nodes

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use camino::Utf8PathBuf;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use ironic_client::Node;
use ironic_client::TargetPowerState;
use ironic_node_lifecycle::Config;
use ironic_node_lifecycle::NodeLifecycle;
use ironic_node_lifecycle::NodeSpec;
use ironic_node_lifecycle::TokioSleeper;
use ironic_node_lifecycle::build_manual_cleaning_steps;
use ironic_node_lifecycle::redact_driver_info;
use slog::Logger;
use slog::info;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[clap(
    name = "ironic-node",
    about = "Drive bare metal nodes through Ironic's provisioning state machine"
)]
struct Opt {
    /// Path to the tool's TOML configuration
    #[clap(short, long, env = "IRONIC_NODE_CONFIG", global = true, action)]
    config: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Debug, Subcommand)]
enum SubCommand {
    /// Print the manual cleaning steps a description would run
    CleanSteps(CleanStepsCommand),
    #[clap(flatten)]
    Node(NodeCommand),
}

/// Subcommands that talk to Ironic
#[derive(Debug, Subcommand)]
enum NodeCommand {
    /// Enroll a node and run every step its description asks for
    Create(NodeFileArgs),
    /// Move an existing node from one description to another
    Update(UpdateCommand),
    /// Tear a node down and remove it from Ironic
    Delete(NodeIdArgs),
    /// Change a node's power state and wait for it to take effect
    Power(PowerCommand),
}

#[derive(Debug, Args)]
struct NodeFileArgs {
    /// TOML description of the node
    #[clap(action)]
    node_file: Utf8PathBuf,
}

#[derive(Debug, Args)]
struct NodeIdArgs {
    /// Node UUID or name
    #[clap(action)]
    node_id: String,
}

#[derive(Debug, Args)]
struct UpdateCommand {
    #[clap(action)]
    node_id: String,
    /// Description the node was last created or updated from
    #[clap(long, action)]
    previous: Utf8PathBuf,
    /// Description to move the node to
    #[clap(action)]
    node_file: Utf8PathBuf,
}

#[derive(Debug, Args)]
struct PowerCommand {
    #[clap(action)]
    node_id: String,
    /// One of "on", "off", "reboot", "soft-off", "soft-reboot" (or the
    /// Ironic spelling, e.g. "power on")
    #[clap(action)]
    target: TargetPowerState,
    /// Seconds to wait for the change; 0 means the default
    #[clap(long, action)]
    timeout: Option<u64>,
}

#[derive(Debug, Args)]
struct CleanStepsCommand {
    #[clap(action)]
    node_file: Utf8PathBuf,
    /// RAID interface to validate against when the description has none
    #[clap(long, action)]
    raid_interface: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    match opt.subcommand {
        // Works offline; a config is only consulted for logging.
        SubCommand::CleanSteps(cmd) => {
            let log = match &opt.config {
                Some(path) => load_config(path)?.log,
                None => ConfigLogging::StderrTerminal {
                    level: ConfigLoggingLevel::Warn,
                },
            }
            .to_logger("ironic-node")
            .context("failed to create logger")?;
            print_clean_steps(&log, &cmd)
        }
        SubCommand::Node(command) => {
            let path = opt.config.as_ref().ok_or_else(|| {
                anyhow!("--config (or IRONIC_NODE_CONFIG) is required")
            })?;
            run(load_config(path)?, command).await
        }
    }
}

async fn run(config: Config, command: NodeCommand) -> Result<()> {
    let log = config
        .log
        .to_logger("ironic-node")
        .context("failed to create logger")?;
    let client = config
        .ironic
        .client(&log)
        .context("failed to build Ironic client")?;
    info!(log, "using ironic";
        "endpoint" => client.baseurl(),
        "api_version" => client.api_version(),
    );
    let lifecycle = NodeLifecycle::new(
        Arc::new(client),
        Arc::new(TokioSleeper),
        config.provision.clone(),
        &log,
    );

    match command {
        NodeCommand::Create(args) => {
            let spec = load_node(&args.node_file)?;
            let node = lifecycle.create(&spec).await?;
            print_node(&node)?;
        }
        NodeCommand::Update(cmd) => {
            let previous = load_node(&cmd.previous)?;
            let desired = load_node(&cmd.node_file)?;
            let node =
                lifecycle.update(&cmd.node_id, &previous, &desired).await?;
            print_node(&node)?;
        }
        NodeCommand::Delete(args) => {
            lifecycle.delete(&args.node_id).await?;
            println!("deleted {}", args.node_id);
        }
        NodeCommand::Power(cmd) => {
            lifecycle
                .set_power_state(&cmd.node_id, cmd.target, cmd.timeout)
                .await?;
            println!("{}: {}", cmd.node_id, cmd.target);
        }
    }
    Ok(())
}

fn load_config(path: &Utf8PathBuf) -> Result<Config> {
    Config::from_file(path)
        .with_context(|| format!("failed to load config from {path}"))
}

fn load_node(path: &Utf8PathBuf) -> Result<NodeSpec> {
    NodeSpec::from_file(path)
        .with_context(|| format!("failed to load node description {path}"))
}

fn print_clean_steps(log: &Logger, cmd: &CleanStepsCommand) -> Result<()> {
    let spec = load_node(&cmd.node_file)?;
    let raid_interface = spec
        .interfaces
        .raid_interface
        .as_deref()
        .or(cmd.raid_interface.as_deref())
        .unwrap_or("");
    let steps = build_manual_cleaning_steps(
        log,
        raid_interface,
        spec.raid_config.as_deref(),
        spec.bios_settings.as_deref(),
    )?;
    println!("{}", serde_json::to_string_pretty(&steps)?);
    Ok(())
}

fn print_node(node: &Node) -> Result<()> {
    let mut node = node.clone();
    node.driver_info = redact_driver_info(&node.driver_info);
    println!("{}", serde_json::to_string_pretty(&node)?);
    Ok(())
}
