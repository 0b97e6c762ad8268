//! `Taskboard` dev server -- in-memory REST API and Action Cable endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Run on the default address 127.0.0.1:4000 with one seeded admin
//! # (admin@example.com / password)
//! cargo run --bin taskboard-devserver
//!
//! # Run on a custom address
//! cargo run --bin taskboard-devserver -- --bind 0.0.0.0:4100
//!
//! # Or via environment variable
//! TASKBOARD_DEV_ADDR=0.0.0.0:4100 cargo run --bin taskboard-devserver
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_devserver::config::{DevCliArgs, DevConfig};
use taskboard_devserver::server::{self, DevState};
use taskboard_devserver::store::Store;

#[tokio::main]
async fn main() {
    let cli = DevCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match DevConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();

    let store = Store::new();
    for seed in &config.users {
        match store.create_account(&seed.email, &seed.password, seed.role) {
            Ok(user) => tracing::info!(user = %user.email, role = %user.role, "seeded account"),
            Err(e) => tracing::warn!(user = %seed.email, error = %e, "skipping seed account"),
        }
    }
    let state = Arc::new(DevState::with_config(store, config.ping_interval));

    tracing::info!(addr = %config.bind_addr, "starting taskboard dev server");

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "dev server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dev server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start dev server");
            std::process::exit(1);
        }
    }
}
