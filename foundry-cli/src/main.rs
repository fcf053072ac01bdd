///! Foundry CLI
///!
///! Command-line interface driving the provisioning and lifecycle engine
///! directly as a library — there is no server process to talk to.

mod commands;
mod output;
mod session;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::cluster::ClusterCommands;
use commands::host::HostCommands;

#[derive(Parser)]
#[command(name = "foundry", author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the inventory/cluster config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    output: String,

    /// Accept any SSH host key without pinning. Never the default.
    #[arg(long)]
    insecure_host_keys: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster provisioning and lifecycle
    Cluster {
        #[command(subcommand)]
        command: ClusterCommands,
    },
    /// Host inventory and SSH bootstrap
    Host {
        #[command(subcommand)]
        command: HostCommands,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Cluster { command } => {
            commands::cluster::handle(command, cli.config, &cli.output, cli.insecure_host_keys).await?
        }
        Commands::Host { command } => {
            commands::host::handle(command, cli.config, &cli.output).await?
        }
        Commands::Completions { shell } => generate_completions(shell),
    }

    Ok(())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
