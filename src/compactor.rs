use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// One compaction check: compact when at least `threshold` events were
/// appended since the last compaction. Returns whether it compacted.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(
                "compacted WAL after {appended} appends ({} lectures kept)",
                engine.lecture_count()
            );
            true
        }
        Err(e) => {
            tracing::warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task: periodic WAL compaction plus lock-table and notify-hub
/// housekeeping.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
        engine.prune_locks();
        engine.notify.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::wal::Wal;
    use std::path::PathBuf;
    use ulid::Ulid;

    const H: Ms = 3_600_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("timetable_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let path = test_wal_path("below_threshold.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
        engine
            .schedule_lecture(
                Ulid::new(),
                None,
                LectureCandidate::new(Span::new(9 * H, 10 * H), "R1", Ulid::new()),
            )
            .await
            .unwrap();

        assert!(!compact_if_needed(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn compacts_churn_away() {
        let path = test_wal_path("churn.wal");
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let lecturer = Ulid::new();

        for _ in 0..5 {
            let id = Ulid::new();
            engine
                .schedule_lecture(
                    id,
                    None,
                    LectureCandidate::new(Span::new(9 * H, 10 * H), "R1", lecturer),
                )
                .await
                .unwrap();
            engine.cancel_lecture(id).await.unwrap();
        }
        let kept = Ulid::new();
        engine
            .schedule_lecture(
                kept,
                Some("Logic".into()),
                LectureCandidate::new(Span::new(9 * H, 10 * H), "R1", lecturer),
            )
            .await
            .unwrap();

        assert!(compact_if_needed(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].lecture_id(), kept);
    }
}
