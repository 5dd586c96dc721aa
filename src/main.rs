//! Castles & Cans controller entrypoint: peripherals, game loop, sensor polling and the
//! operator console.

use anyhow::Context;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use castles_cans::{
    config::AppConfig,
    services::{commands::run_console, presentation::run_console_presenter},
    state::AppContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let target_count = config.target_count;
    let context = AppContext::from_config(config);
    tokio::spawn(run_console_presenter(context.hub().subscribe()));

    let game = context.start();
    info!(
        hardware = game.actuators.available(),
        "controller ready; keys: s start, 1-{target_count} hit, t tunnel, l launch, b return, \
         r/g dispense, n next turn, w/c watchtower, x clear tube, q quit"
    );

    let console = run_console(
        BufReader::new(tokio::io::stdin()),
        game.dispatcher.clone(),
        target_count,
    );
    tokio::select! {
        _ = shutdown_signal() => info!("shutdown signal received"),
        quit = console => {
            if !quit {
                info!("console closed; waiting for a shutdown signal");
                shutdown_signal().await;
            }
        }
    }

    let service = game.shutdown().await.context("game loop panicked")?;
    info!(phase = %service.phase(), "controller stopped");
    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,castles_cans=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
