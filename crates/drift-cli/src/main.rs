use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use driftgrid_cloud::{CloudApi, SimulatedCloud};
use driftgrid_config::Registry;
use driftgrid_provider::TransportFactory;

mod commands;
mod transport;

#[derive(Parser)]
#[command(
    name = "drift",
    about = "Driftgrid — declarative fleet provisioning",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Configuration directory holding environments.yml, services.yml,
    /// and credentials.yml
    #[arg(short, long, default_value = ".")]
    config_dir: PathBuf,
    /// Environment name nodes are tagged with
    #[arg(short, long, default_value = "dev")]
    env: String,
    #[arg(long, value_enum, default_value_t = Verbosity::Info)]
    verbosity: Verbosity,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, ValueEnum)]
enum Verbosity {
    Debug,
    Info,
    Quiet,
}

#[derive(Copy, Clone, ValueEnum)]
enum Format {
    Simple,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Converge an environment template: provision missing nodes,
    /// terminate stale ones, install services
    Launch {
        /// Template name from environments.yml
        template: String,
        /// Record the plan instead of mutating the backend
        #[arg(long)]
        noop: bool,
    },
    /// Shut down every node the template is running
    Terminate { template: String },
    /// List environment template names
    ListTemplates,
    /// List the nodes currently running for a template
    ListNodes { template: String },
    /// Render a template's declared nodes
    Describe {
        template: String,
        #[arg(short, long, value_enum, default_value_t = Format::Simple)]
        format: Format,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbosity {
        Verbosity::Debug => "debug",
        Verbosity::Info => "info",
        Verbosity::Quiet => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    // Cloud calls go through the in-memory simulator until a real
    // binding is wired in; file and host backends are fully live.
    let cloud: Arc<dyn CloudApi> = Arc::new(SimulatedCloud::new());
    let transports: Arc<dyn TransportFactory> = Arc::new(transport::OpenSsh);
    let registry = Registry::with_defaults(&cli.config_dir, cloud, transports);

    match cli.command {
        Commands::Launch { template, noop } => {
            commands::launch(&cli.config_dir, &cli.env, &template, noop, &registry)
        }
        Commands::Terminate { template } => {
            commands::terminate(&cli.config_dir, &cli.env, &template, &registry)
        }
        Commands::ListTemplates => commands::list_templates(&cli.config_dir),
        Commands::ListNodes { template } => {
            commands::list_nodes(&cli.config_dir, &cli.env, &template, &registry)
        }
        Commands::Describe { template, format } => commands::describe(
            &cli.config_dir,
            &cli.env,
            &template,
            matches!(format, Format::Table),
            &registry,
        ),
    }
}
