use std::time::Duration;

use anyhow::{bail, Context};
use editor_storage_core::{Backend, BackendRegistry, FileDescriptor, Location};
use editor_storage_local::LocalFileBackend;
use tokio::signal;
use tracing::{info, warn};

use crate::config::{Command, Target};
use crate::document::Document;

/// Interval of the manual change check backing up filesystem events.
const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run(
    command: Command,
    registry: &BackendRegistry,
    local: &LocalFileBackend,
) -> anyhow::Result<()> {
    match command {
        Command::Backends => {
            for backend in registry.list() {
                println!("{}", backend.backend_name());
            }
        }
        Command::Find(target) => {
            let file = find(local, &target).await?;
            println!("{}", serde_json::to_string_pretty(&file)?);
        }
        Command::Cat(target) => {
            let file = find(local, &target).await?;
            let loaded = local.load(&file).await?;
            print!("{}", loaded.data);
        }
        Command::Create {
            target,
            mime_type,
            data,
        } => {
            let location = target.location.as_deref().map(Location::from);
            let file = local
                .create(&target.name, location.as_ref(), &mime_type, &data)
                .await?;
            info!("Created {}", file);
            println!("{}", serde_json::to_string_pretty(&file)?);
        }
        Command::Save { target, data } => {
            let file = find(local, &target).await?;
            local.save(&file, &data).await?;
            info!("Saved {}", file);
        }
        Command::Watch(target) => watch(local, &target).await?,
        Command::Edit { target, append } => edit(registry, local, &target, &append).await?,
    }
    Ok(())
}

async fn find(backend: &dyn Backend, target: &Target) -> anyhow::Result<FileDescriptor> {
    let location = target.location.as_deref().map(Location::from);
    backend
        .find(&target.name, location.as_ref())
        .await
        .with_context(|| format!("{} not found", target.name))
}

/// Load a file, then wait for its change signal or Ctrl+C.
async fn watch(local: &LocalFileBackend, target: &Target) -> anyhow::Result<()> {
    let file = find(local, target).await?;
    let loaded = local.load(&file).await?;
    let Some(changes) = loaded.changes else {
        bail!("Change detection is not available for {}", file);
    };
    info!(
        "Watching {} ({} bytes), press Ctrl+C to stop",
        local.get_name(&file),
        loaded.data.len()
    );

    let changed = changes.changed();
    tokio::pin!(changed);
    let mut poll = tokio::time::interval(WATCH_POLL_INTERVAL);

    loop {
        tokio::select! {
            result = &mut changed => {
                match result {
                    Some(file) => println!("{} changed on disk", file.uri),
                    None => warn!("Stopped watching {}", file),
                }
                return Ok(());
            }
            _ = poll.tick() => {
                local.check_for_changes(&file)?;
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                return Ok(());
            }
        }
    }
}

/// Open a document, edit it, and rely on the shutdown autosave to write it.
async fn edit(
    registry: &BackendRegistry,
    local: &LocalFileBackend,
    target: &Target,
    text: &str,
) -> anyhow::Result<()> {
    let file = find(local, target).await?;
    let loaded = local.load(&file).await?;

    let document = Document::new(loaded.data);
    let (needs_saving, get_data) = document.autosave_hooks();
    local.autosave(file.clone(), needs_saving, get_data);

    document.append(text);

    // Application shutdown: flush every backend
    let report = registry.do_autosave_all().await;
    if report.saved.contains(&file) {
        document.mark_saved();
        println!("{} autosaved", local.get_name(&file));
    }
    if let Some((failed, e)) = report.failed.first() {
        bail!("Autosave of {} failed: {}", failed, e);
    }
    if document.needs_saving() {
        bail!("{} still has unsaved changes", local.get_name(&file));
    }
    Ok(())
}
