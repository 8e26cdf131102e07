//! Admin server binary.
//!
//! Configuration comes from the environment:
//! - `MOSAIC_BIND_ADDR`   — listen address (default `127.0.0.1:8787`)
//! - `MOSAIC_ADMIN_TOKEN` — admin token; unset leaves the surface open
//! - `MOSAIC_DATA_DIR`    — snapshot store directory (default `mosaic_data`)
//! - `RUST_LOG`           — log filter (env_logger)

use mosaic_sync::admin::{self, AdminConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = AdminConfig::from_env();
    log::info!(
        "Starting mosaic-sync admin server (data dir: {})",
        config.storage_path.display()
    );
    admin::serve(config).await
}
