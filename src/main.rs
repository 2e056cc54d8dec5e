mod cache;
mod comparison;
mod config;
mod entsoe;
mod field;
mod generation;
mod metrics;
mod series;
mod server;

use crate::config::Config;
use anyhow::{Context, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(?config, "starting grid-dash");

    server::start_server(config).await
}
