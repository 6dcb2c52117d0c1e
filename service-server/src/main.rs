//! # Service Server
//!
//! Binary harness around `service-core`'s actor runtime: parses CLI
//! overrides, wires up `tracing`, builds a [`RuntimeConfig`], registers the
//! built-in modules, and runs the thread orchestrator to completion.

use std::path::PathBuf;

use clap::Parser;
use service_core::{Orchestrator, RuntimeConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI overrides layered on top of `RuntimeConfig::from_env`.
#[derive(Parser, Debug)]
#[command(name = "service-server", version, about)]
struct Args {
    /// Worker thread count (overrides config)
    #[arg(long, env = "THREAD")]
    threads: Option<usize>,

    /// Per-worker dispatch weight: -1 fair, 0 drain, k>0 -> length>>k
    #[arg(long, env = "WEIGHT")]
    weight: Option<i32>,

    /// Enable wall-clock CPU accounting per dispatched message
    #[arg(long, env = "PROFILE")]
    profile: bool,

    /// Module search path template (`?` substituted with the module name)
    #[arg(long, env = "CPATH")]
    cpath: Option<String>,

    /// `"name arg..."` identifying the first service to launch after the logger
    #[arg(long, env = "BOOTSTRAP")]
    bootstrap: Option<String>,

    /// Log file path for the bootstrap logger module
    #[arg(long, env = "LOGGER")]
    logger: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RuntimeConfig::from_env();
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(weight) = args.weight {
        config.weight = weight;
    }
    if args.profile {
        config.profile = true;
    }
    if let Some(cpath) = args.cpath {
        config.cpath = Some(cpath);
    }
    if let Some(bootstrap) = args.bootstrap {
        config.bootstrap = bootstrap;
    }
    if let Some(logger) = args.logger {
        config.logger = Some(logger);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "service_server=info,service_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        threads = config.threads,
        weight = config.weight,
        bootstrap = %config.bootstrap,
        "runtime configuration loaded"
    );

    let orchestrator = Orchestrator::new(config);
    orchestrator.register_builtins();
    orchestrator.run()
}
