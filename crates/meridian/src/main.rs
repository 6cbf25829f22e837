//! Launcher entry point.
//!
//! One binary, two roles: `meridian gateway` runs the persistent
//! client-facing process, `meridian logic` runs the restartable game
//! process. Both roles read the same configuration file, so the wire
//! address the gateway dials and the one logic binds always come from
//! a single source.

mod cli;
mod config;
mod signals;

use cli::{CliArgs, Role};
use config::AppConfig;
use meridian_gateway::Gateway;
use meridian_logic::{Logic, LogicShared, MemoryAuthenticator, MemoryFlagStore};
use meridian_logic::blocking::BlockingPool;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Err(e) = config.validate() {
        eprintln!("configuration invalid: {e}");
        std::process::exit(1);
    }

    setup_logging(&config.logging)?;
    info!(
        config = %args.config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "meridian starting"
    );

    match args.role {
        Role::Gateway => run_gateway(config).await,
        Role::Logic => run_logic(config).await,
    }
}

async fn run_gateway(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = Gateway::new(config.gateway);
    let shared = gateway.shared();
    info!(
        logic = %shared.config.logic_address,
        "gateway process starting"
    );

    let handle = tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            error!("gateway failed: {e}");
            std::process::exit(1);
        }
    });

    signals::wait_for_shutdown_signal().await?;
    info!("shutting down gateway");
    shared.trigger_shutdown();
    handle.await?;
    Ok(())
}

async fn run_logic(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(BlockingPool::new(config.logic.blocking_pool_size));
    let authenticator = MemoryAuthenticator::new(pool.clone());
    for seed in &config.accounts {
        authenticator.add_account(&seed.name, &seed.password);
    }
    if !config.accounts.is_empty() {
        info!(count = config.accounts.len(), "bootstrap accounts seeded");
    }

    let shared = LogicShared::with_parts(
        config.logic,
        pool,
        Arc::new(authenticator),
        Arc::new(MemoryFlagStore::new()),
    );
    let logic = Logic::with_shared(shared.clone());
    info!(bind = %shared.config.wire_bind, "logic process starting");

    let handle = tokio::spawn(async move {
        if let Err(e) = logic.run().await {
            error!("logic failed: {e}");
            std::process::exit(1);
        }
    });

    signals::wait_for_shutdown_signal().await?;
    info!("shutting down logic");
    shared.trigger_shutdown();
    handle.await?;
    Ok(())
}

/// Initializes the tracing subscriber from the logging settings; the
/// `RUST_LOG` environment variable wins over the configured level.
fn setup_logging(settings: &config::LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    if settings.json_format {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
    Ok(())
}
