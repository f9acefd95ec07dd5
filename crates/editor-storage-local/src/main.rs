mod commands;
mod config;
mod document;

use std::sync::Arc;

use clap::Parser;
use editor_storage_core::{BackendRegistry, MemoryBackend};
use editor_storage_local::LocalFileBackend;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (stderr, stdout carries command output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    let root = config.effective_root();
    info!("Local storage root: {}", root.display());

    // Registry order is the order storage choices are offered in
    let local = Arc::new(LocalFileBackend::new(&root));
    let mut registry = BackendRegistry::new();
    registry.add(local.clone());
    registry.add(Arc::new(MemoryBackend::new()));

    commands::run(config.command, &registry, &local).await
}
