use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod authority;
mod config;
mod dbus_interface;
mod service;
mod store;

use config::{BusKind, Config};
use dbus_interface::{AttendanceBus, BUS_NAME, OBJECT_PATH};
use service::AttendanceService;
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("punchcardd starting");

    let config = Config::load()?;
    tracing::info!(
        db = %config.db_path.display(),
        bus = ?config.bus,
        cooldown_secs = config.cooldown_secs,
        match_threshold = config.match_threshold,
        match_policy = %config.match_policy,
        utc_offset_minutes = config.utc_offset_minutes,
        "configuration loaded"
    );

    let store = Store::open(&config.db_path).await?;
    tracing::info!(path = %config.db_path.display(), "attendance store opened");

    let service = Arc::new(AttendanceService::new(store, &config));

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceBus::new(service))?
        .build()
        .await?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "punchcardd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("punchcardd shutting down");

    Ok(())
}
