//! pipeline CLI tool
//!
//! Command-line interface for resolving assets in a working directory.
//!
//! ## Commands
//!
//! - `fetch <target>`: resolve an asset (and its dependencies), update the state file, and
//!   consume intermediate files from the working directory
//! - `destroy <target>`: remove an asset's files and its state entry
//! - `state`: list the assets recorded in the state file
//! - `compile <host.yaml>`: run the network config compiler on a single host document
//!
//! Ctrl-C cancels in-flight generation; running compiler processes are killed.

use asset_pipeline::{
    assets::{NetworkHosts, StaticNetworkConfig},
    nmstate::{HostNetworkConfig, NetworkConfigCompiler},
    AssetId, PipelineConfig, PipelineContext, Store,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(author, version, about = "Resolve cluster bootstrap assets in a working directory", long_about = None)]
struct Cli {
    /// Configuration file path (default: <dir>/pipeline.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    NetworkHosts,
    StaticNetworkConfig,
}

impl Target {
    fn id(self) -> AssetId {
        match self {
            Target::NetworkHosts => AssetId::of::<NetworkHosts>(),
            Target::StaticNetworkConfig => AssetId::of::<StaticNetworkConfig>(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an asset and everything it depends on
    Fetch {
        target: Target,

        /// Working directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Assets whose files must stay in the working directory (repeatable)
        #[arg(short, long)]
        keep: Vec<Target>,

        /// Write the target's files into the working directory afterwards
        #[arg(short, long)]
        write: bool,
    },

    /// Remove an asset from the working directory and the state file
    Destroy {
        target: Target,

        /// Working directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// List assets recorded in the state file
    State {
        /// Working directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Compile a single host network document and print the resulting files
    Compile {
        /// YAML file with `networkYaml` and `interfaces`
        host: PathBuf,
    },
}

fn load_config(explicit: Option<PathBuf>, dir: &std::path::Path) -> PipelineConfig {
    let path = explicit.unwrap_or_else(|| dir.join(DEFAULT_CONFIG_FILE));
    match PipelineConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to read config {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Fetch {
            target,
            dir,
            keep,
            write,
        } => {
            let config = load_config(cli.config, &dir);
            let ctx = PipelineContext::new(&config);
            cancel_on_ctrl_c(&runtime, ctx.cancel_token().clone());

            let mut store = Store::with_config(&dir, &config)?;
            let preserved: Vec<AssetId> = keep.into_iter().map(Target::id).collect();
            let id = target.id();
            let result = runtime.block_on(store.fetch_id(&ctx, &id, &preserved));
            if let Err(e) = result {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
            if write {
                store.persist_id(&id)?;
            }

            for file in store.load_id(&id)?.map(|v| v.files()).unwrap_or_default() {
                println!("{}", file.filename.display());
            }
            println!(
                "✓ {} resolved ({:?})",
                id.name(),
                store.provenance(&id)
            );
            Ok(())
        }

        Commands::Destroy { target, dir } => {
            let config = load_config(cli.config, &dir);
            let mut store = Store::with_config(&dir, &config)?;
            store.destroy_id(&target.id())?;
            println!("✓ {} destroyed", target.id().name());
            Ok(())
        }

        Commands::State { dir } => {
            let config = load_config(cli.config, &dir);
            let store = Store::with_config(&dir, &config)?;
            if store.state_file().is_empty() {
                println!("No assets recorded in {}", store.state_path().display());
            }
            for key in store.state_file().keys() {
                println!("{key}");
            }
            Ok(())
        }

        Commands::Compile { host } => {
            let config = load_config(cli.config, std::path::Path::new("."));
            let document: HostNetworkConfig =
                serde_yaml::from_str(&std::fs::read_to_string(&host)?)?;
            let compiler = NetworkConfigCompiler::from_config(&config);
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(&runtime, cancel.clone());

            match runtime.block_on(compiler.compile(&cancel, &document)) {
                Ok(files) => {
                    for file in files {
                        println!("# {}", file.path.display());
                        println!("{}", file.contents);
                    }
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn cancel_on_ctrl_c(runtime: &tokio::runtime::Runtime, cancel: CancellationToken) {
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}
