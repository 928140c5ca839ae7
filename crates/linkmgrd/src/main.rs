//! linkmgrd daemon entry point.
//!
//! Initializes logging, loads the daemon configuration, creates the port
//! directory and runs until interrupted. State-store and driver transports
//! are wired by the platform packaging; this binary owns the per-port
//! reconciliation core.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use sonic_linkmgrd::config::DaemonConfig;
use sonic_linkmgrd::driver::DriverClient;
use sonic_linkmgrd::error::LinkMgrResult;
use sonic_linkmgrd::link_manager::{SwitchCause, SwitchingPhase};
use sonic_linkmgrd::state_db::StateDbPublisher;
use sonic_linkmgrd::MuxManager;

#[derive(Parser, Debug)]
#[command(name = "linkmgrd", about = "Dual-ToR MUX link manager daemon")]
struct Args {
    /// Path to the daemon configuration file (JSON).
    #[arg(short = 'f', long, default_value = "/etc/sonic/mux_linkmgr.json")]
    config: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Placeholder driver transport: logs requests until the platform RPC
/// wiring registers the real client.
struct LoggingDriver;

#[async_trait::async_trait]
impl DriverClient for LoggingDriver {
    async fn set_mux_state(
        &self,
        port: &str,
        target: mux_types::MuxState,
    ) -> LinkMgrResult<()> {
        info!("driver: set {} -> {}", port, target);
        Ok(())
    }

    async fn probe_mux_state(&self, port: &str) -> LinkMgrResult<()> {
        info!("driver: probe {}", port);
        Ok(())
    }
}

/// Placeholder publisher: logs publications until the state-store adapter
/// registers the real one.
struct LoggingPublisher;

#[async_trait::async_trait]
impl StateDbPublisher for LoggingPublisher {
    async fn publish_mux_state(
        &self,
        port: &str,
        state: mux_types::MuxState,
    ) -> LinkMgrResult<()> {
        info!("publish: {} mux state {}", port, state);
        Ok(())
    }

    async fn publish_peer_mux_state(
        &self,
        port: &str,
        state: mux_types::MuxState,
    ) -> LinkMgrResult<()> {
        info!("publish: {} peer mux state {}", port, state);
        Ok(())
    }

    async fn publish_health(
        &self,
        port: &str,
        health: mux_types::LinkManagerHealth,
    ) -> LinkMgrResult<()> {
        info!("publish: {} health {}", port, health);
        Ok(())
    }

    async fn publish_switching_metric(
        &self,
        port: &str,
        phase: SwitchingPhase,
        cause: SwitchCause,
    ) -> LinkMgrResult<()> {
        info!("publish: {} switching {:?} cause {}", port, phase, cause);
        Ok(())
    }

    async fn publish_link_prober_metric(
        &self,
        port: &str,
        label: mux_types::LinkProberState,
        session_id: &str,
    ) -> LinkMgrResult<()> {
        info!("publish: {} prober {} session {}", port, label, session_id);
        Ok(())
    }

    async fn publish_pck_loss_ratio(
        &self,
        port: &str,
        unknown: u64,
        total: u64,
    ) -> LinkMgrResult<()> {
        info!("publish: {} loss ratio {}/{}", port, unknown, total);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("--- Starting linkmgrd (Rust) ---");

    let contents = match std::fs::read_to_string(&args.config) {
        Ok(contents) => contents,
        Err(e) => {
            error!("Failed to read config {}: {}", args.config, e);
            return ExitCode::FAILURE;
        }
    };
    let config = match DaemonConfig::from_json(&contents) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to parse config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut manager = MuxManager::new(
        config,
        Arc::new(LoggingDriver),
        Arc::new(LoggingPublisher),
    );
    manager.initialize();
    info!("linkmgrd initialized with {} ports", manager.port_count());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("signal wait failed: {}", e);
    }
    info!("linkmgrd shutting down");
    manager.shutdown().await;
    ExitCode::SUCCESS
}
