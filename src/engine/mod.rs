mod availability;
mod conflict;
mod error;
mod locks;
mod mutations;
mod queries;
mod store;
mod validator;

pub use availability::{free_windows, merge_overlapping, subtract_intervals};
pub use conflict::find_conflicts;
pub use error::{EngineError, ScheduleViolation};
pub use locks::{LockKey, LockSet, ResourceLocks};
pub use store::{BookingStore, Calendar, InMemoryStore};
pub use validator::ScheduleValidator;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Events written and fsynced together.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// write and fsync the whole batch once and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (events, response) = match cmd {
            WalCommand::Append { events, response } => (events, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(events, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        let event_count: usize = batch.iter().map(|(events, _)| events.len()).sum();
        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(event_count as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush of {event_count} events failed: {e}");
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .flat_map(|(events, _)| events)
        .try_for_each(|event| wal.append_buffered(event));
    // Flush even after an append error so partially buffered bytes don't leak
    // into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Record outcome and latency of one engine operation.
pub(super) fn observe<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(EngineError::Violation(v)) => {
            observability::record_violation(v);
            tracing::debug!("{op} rejected: {v}");
            "rejected"
        }
        Err(e) => {
            tracing::debug!("{op} failed: {e}");
            "error"
        }
    };
    metrics::counter!(observability::OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}

/// One committed event and the calendars to notify about it.
pub(super) type Change = (Event, Vec<ResourceKey>);

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, events: Vec<Event>) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { events, response: tx })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// The scheduling engine: the booking store, the validator reading from it,
/// and the lock table that makes check-then-commit atomic per resource.
pub struct Engine {
    store: Arc<InMemoryStore>,
    validator: ScheduleValidator<InMemoryStore>,
    locks: ResourceLocks,
    /// Held shared by every commit, exclusively by compaction.
    pub(super) commit_gate: Arc<RwLock<()>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Arc::new(InMemoryStore::new());
        for event in &events {
            store.apply_event(event);
        }
        info!(
            "replayed {} events from {}: {} lectures",
            events.len(),
            wal_path.display(),
            store.len()
        );
        metrics::gauge!(observability::LECTURES_ACTIVE).set(store.len() as f64);

        Ok(Self {
            validator: ScheduleValidator::new(store.clone()),
            store,
            locks: ResourceLocks::new(),
            commit_gate: Arc::new(RwLock::new(())),
            wal_tx,
            notify,
        })
    }

    pub fn validator(&self) -> &ScheduleValidator<InMemoryStore> {
        &self.validator
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    /// WAL-append `changes` as one group, apply them to the store, notify
    /// every affected calendar, then release `locks`.
    ///
    /// The commit runs on its own task and finishes even if the caller is
    /// dropped. `locks` stay held until the store reflects the log.
    pub(super) async fn commit(&self, changes: Vec<Change>, locks: LockSet) -> Result<(), EngineError> {
        let gate = self.commit_gate.clone().read_owned().await;
        let store = self.store.clone();
        let notify = self.notify.clone();
        let wal_tx = self.wal_tx.clone();

        let task = tokio::spawn(async move {
            let _held = (gate, locks);
            let events = changes.iter().map(|(event, _)| event.clone()).collect();
            wal_append(&wal_tx, events).await?;
            for (event, affected) in &changes {
                store.apply_event(event);
                for key in affected {
                    notify.send(key, event);
                }
            }
            metrics::gauge!(observability::LECTURES_ACTIVE).set(store.len() as f64);
            Ok::<(), EngineError>(())
        });
        task.await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    pub(super) async fn lock(&self, keys: Vec<LockKey>) -> LockSet {
        self.locks.acquire(keys).await
    }

    /// Release lock-table entries no operation is using.
    pub fn prune_locks(&self) {
        self.locks.prune();
    }
}
