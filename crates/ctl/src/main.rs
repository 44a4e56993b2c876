//! Container lifecycle CLI
//!
//! Starts, stops, inspects and duplicates a single container through the
//! local Docker Engine.

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meter_lib::runtime::{BollardRuntime, ContainerRuntime, RuntimeController};
use output::OutputFormat;
use tracing_subscriber::EnvFilter;

/// Container lifecycle CLI
#[derive(Parser)]
#[command(name = "containerctl")]
#[command(author, version, about = "Start, stop and duplicate a container", long_about = None)]
pub struct Cli {
    /// Container to operate on (can also be set via CONTAINERCTL_CONTAINER_ID env var)
    #[arg(long, short, env = "CONTAINERCTL_CONTAINER_ID")]
    pub container_id: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the container
    Start,

    /// Stop the container
    Stop,

    /// Show the container's id, name, image and state
    Inspect,

    /// Create a new container from this container's image
    Duplicate {
        /// Publish a port on the copy: [ip:][host:]container[/proto]
        #[arg(long, short)]
        port: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .compact()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .init();
    }

    let runtime = BollardRuntime::connect_with_local_defaults()
        .context("Failed to connect to the container runtime")?;
    let controller = RuntimeController::new(runtime, cli.container_id.as_str());

    if let Err(e) = execute(&controller, cli.command, cli.format).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn execute<R: ContainerRuntime>(
    controller: &RuntimeController<R>,
    command: Commands,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Commands::Start => {
            let id = controller.start().await?;
            output::print_success(&format!("Started container {}", id));
        }
        Commands::Stop => {
            let id = controller.stop().await?;
            output::print_success(&format!("Stopped container {}", id));
        }
        Commands::Inspect => {
            let details = controller.inspect().await?;
            output::print_details(&details, format);
        }
        Commands::Duplicate { port: None } => {
            let id = controller.duplicate().await?;
            output::print_success(&format!(
                "Duplicated {} as {}",
                controller.container_id(),
                id
            ));
        }
        Commands::Duplicate { port: Some(port) } => {
            let id = controller.duplicate_with_port(&port).await?;
            output::print_success(&format!(
                "Duplicated {} as {} with port {}",
                controller.container_id(),
                id,
                port
            ));
        }
    }

    Ok(())
}
