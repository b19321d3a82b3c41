mod eligibility;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::{EngineError, EntityKind};

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{FixedOffset, Offset, Utc};
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::model::*;
use crate::wal::Wal;

use store::ScheduleState;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
    for (_, tx) in batch.drain(..) {
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub policy: AuthorizationPolicy,
    /// Fixed local offset anchoring week windows.
    pub utc_offset: FixedOffset,
    /// WAL appends between automatic compactions.
    pub compact_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: AuthorizationPolicy::DirectMembership,
            utc_offset: Utc.fix(),
            compact_threshold: 10_000,
        }
    }
}

/// The substitution engine. One schedule per process; queries take the read
/// lock, mutations hold the write lock across the whole validate → WAL-append
/// → apply sequence, which is what serializes assignment transactions.
pub struct Engine {
    state: RwLock<ScheduleState>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub(super) config: EngineConfig,
    appends_since_compact: AtomicU64,
}

impl Engine {
    /// Replay the WAL into a fresh state and start the group-commit writer.
    /// Must run inside a tokio runtime.
    pub fn new(wal_path: PathBuf, config: EngineConfig) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut state = ScheduleState::new();
        for event in &events {
            state.apply_event(event);
        }
        metrics::counter!(crate::observability::WAL_REPLAYED_EVENTS)
            .increment(events.len() as u64);
        tracing::info!(
            replayed = events.len(),
            lecturers = state.lecturers.len(),
            sessions = state.sessions.len(),
            "schedule rebuilt from WAL"
        );

        Ok(Self {
            state: RwLock::new(state),
            wal_tx,
            config,
            appends_since_compact: AtomicU64::new(0),
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// WAL-append + apply in one call, under the caller's write lock. The
    /// event is durable before it becomes visible.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut ScheduleState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        state.apply_event(&event);

        let appended = self.appends_since_compact.fetch_add(1, Ordering::Relaxed) + 1;
        if appended >= self.config.compact_threshold {
            self.appends_since_compact.store(0, Ordering::Relaxed);
            // The mutation itself is already durable; a failed compaction
            // only leaves a longer log behind.
            if let Err(e) = self.compact_locked(state).await {
                tracing::warn!(error = %e, "WAL compaction failed");
            }
        }
        Ok(())
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let state = self.state.write().await;
        self.compact_locked(&state).await
    }

    /// Caller must hold the write lock: the snapshot must be ordered with
    /// respect to every append already queued.
    async fn compact_locked(&self, state: &ScheduleState) -> Result<(), EngineError> {
        let events = state.snapshot_events();
        let snapshot_len = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS).increment(1);
        tracing::info!(events = snapshot_len, "WAL compacted");
        Ok(())
    }
}
