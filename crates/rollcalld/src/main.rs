use anyhow::{Context, Result};
use rollcall_core::{Collaborators, FrameSource, Notifier, Session};
use rollcall_hw::{CameraSource, ImageLoader, SnapshotSource};
use rollcall_models::OnnxAnalyzer;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod notifier;

use config::{Config, SourceKind};
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};
use notifier::DbusNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        label = %config.label,
        source = ?config.source,
        references = config.reference_images.len(),
        model_dir = %config.model_dir.display(),
        "configuration loaded"
    );

    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .build()
        .await
        .context("failed to connect to the session bus")?;
    let notifier: Arc<dyn Notifier> = Arc::new(DbusNotifier::new(connection.clone()));

    let source: Arc<dyn FrameSource> = match config.source {
        SourceKind::Camera => Arc::new(
            CameraSource::open(&config.camera_device, config.warmup_frames)
                .await
                .with_context(|| format!("failed to open camera {}", config.camera_device))?,
        ),
        SourceKind::Snapshot => {
            let path = config
                .snapshot_path
                .clone()
                .context("snapshot source needs snapshot_path")?;
            Arc::new(SnapshotSource::new(path))
        }
    };

    let analyzer = Arc::new(OnnxAnalyzer::new(config.model_paths()));
    let collaborators = Collaborators {
        models: analyzer.clone(),
        references: Arc::new(ImageLoader::new()),
        analyzer,
        source,
        notifier,
    };

    let session = Session::start(
        collaborators,
        &config.label,
        &config.references(),
        config.monitor_config(),
    )
    .await
    .context("failed to start monitoring session")?;

    for skipped in &session.skipped {
        tracing::warn!(image = %skipped.image, reason = %skipped.reason, "reference image not enrolled");
    }
    if session.profile.is_empty() {
        tracing::warn!(label = %session.profile.label, "no usable reference images; nobody will be recognized");
    }

    let shutdown = Arc::new(Notify::new());
    let service = RollcallService::new(
        session.monitor.subscribe(),
        session.monitor.stopper(),
        session.profile.embeddings.len(),
        Arc::clone(&shutdown),
    );
    connection
        .object_server()
        .at(OBJECT_PATH, service)
        .await
        .context("failed to register D-Bus interface")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupted");
        }
        _ = shutdown.notified() => {
            tracing::info!("stop requested");
        }
    }

    session.monitor.stop();
    let state = session.monitor.join().await?;
    tracing::info!(
        ticks = state.ticks,
        miss_streak = state.miss_streak,
        "rollcalld shutting down"
    );

    Ok(())
}
