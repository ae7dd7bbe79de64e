use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod ledger;
mod report;
mod session;

use config::Config;
use dbus_interface::{AppState, AttendanceService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        artifact = %config.artifact_path.display(),
        db = %config.db_path.display(),
        reports = %config.reports_dir.display(),
        threshold = config.accept_threshold,
        "configuration loaded"
    );

    rollcall_models::verify_models_dir(&config.model_dir)
        .context("model verification failed (run `rollcall setup` to download models)")?;

    let classifier = rollcall_core::IdentityClassifier::load(
        &config.artifact_path,
        rollcall_core::embedder::MODEL_VERSION,
        rollcall_core::embedder::EMBEDDING_DIM,
    )
    .context("failed to load classifier artifact")?;
    let roster = classifier.roster();
    tracing::info!(identities = roster.len(), "classifier artifact loaded");

    let ledger = ledger::AttendanceLedger::open(&config.db_path)
        .await
        .context("failed to open attendance ledger")?;

    let reports = report::ReportWriter::new(config.reports_dir.clone());

    let engine =
        engine::spawn_engine(&config, classifier).context("failed to start recognition engine")?;

    let session_bus = config.session_bus;
    let state = Arc::new(Mutex::new(AppState {
        config,
        engine,
        ledger,
        reports,
        roster,
    }));
    let service = AttendanceService { state };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", service)?
        .build()
        .await
        .context("failed to claim bus name org.rollcall.Attendance1")?;

    let bus = if session_bus { "session" } else { "system" };
    tracing::info!(bus, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
