//! Goose - a minimal Wayland compositor
//!
//! Reads configuration from the environment and runs the compositor
//! until the event loop stops.

use log::info;

use goose::config::Config;
use goose::startup::Goose;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let mut goose = Goose::start(&config)?;
    info!("Clients can connect with WAYLAND_DISPLAY={}", goose.socket_name());

    goose.run()?;
    goose.shutdown();
    Ok(())
}
