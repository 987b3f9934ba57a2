use std::sync::Arc;

use tracing::info;

use timetable::compactor;
use timetable::config::Config;
use timetable::engine::Engine;
use timetable::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    timetable::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify)?);
    info!("timetable engine ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lectures: {}", engine.lecture_count());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let double_booked = engine.audit();
    if double_booked.is_empty() {
        info!("audit: no double bookings");
    } else {
        for (key, a, b) in &double_booked {
            tracing::warn!("audit: {key} double-booked by lectures {a} and {b}");
        }
    }

    let compactor_engine = engine.clone();
    tokio::spawn(compactor::run_compactor(
        compactor_engine,
        config.compact_threshold,
        config.compact_interval,
    ));

    // Run until SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received, compacting WAL");
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("timetable stopped");
    Ok(())
}
