mod availability;
mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;

pub use availability::{free_ranges, merge_ranges, subtract_ranges};
pub use conflict::is_valid_range;
pub use error::EngineError;
pub use pricing::{quote, rental_days, total_price};
pub use queries::ToolFilter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedToolState = Arc<RwLock<ToolState>>;

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
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
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

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
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

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
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
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedToolState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → tool id
    pub(super) booking_to_tool: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a ToolState (no locking — caller holds the lock).
fn apply_to_tool(ts: &mut ToolState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ToolUpdated {
            name,
            category,
            daily_rate,
            available,
            location,
            ..
        } => {
            ts.name = name.clone();
            ts.category = category.clone();
            ts.daily_rate = *daily_rate;
            ts.available = *available;
            ts.location = location.clone();
        }
        Event::BookingOpened {
            id,
            tool_id,
            renter_id,
            period,
            total_price,
        } => {
            ts.insert_booking(Booking {
                id: *id,
                renter_id: *renter_id,
                period: *period,
                total_price: *total_price,
                status: BookingStatus::Pending,
            });
            booking_map.insert(*id, *tool_id);
        }
        Event::BookingStatusChanged { id, status, .. } => {
            // Cancelled bookings stay on record; only the status flips.
            if let Some(booking) = ts.get_booking_mut(*id) {
                booking.status = *status;
            }
        }
        // ToolAdded is handled at the DashMap level, not here
        Event::ToolAdded { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            booking_to_tool: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::ToolAdded {
                    id,
                    owner_id,
                    name,
                    category,
                    daily_rate,
                    available,
                    location,
                } => {
                    let ts = ToolState::new(
                        *id,
                        *owner_id,
                        name.clone(),
                        category.clone(),
                        *daily_rate,
                        *available,
                        location.clone(),
                    );
                    engine.state.insert(*id, Arc::new(RwLock::new(ts)));
                }
                other => {
                    if let Some(tool_id) = event_tool_id(other)
                        && let Some(entry) = engine.state.get(&tool_id)
                    {
                        let ts_arc = entry.clone();
                        let mut guard = ts_arc.try_write().expect("replay: uncontended write");
                        apply_to_tool(&mut guard, other, &engine.booking_to_tool);
                    }
                }
            }
        }

        Ok(engine)
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
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_tool(&self, id: &Ulid) -> Option<SharedToolState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn tool_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_tool.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        tool_id: Ulid,
        ts: &mut ToolState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_tool(ts, event, &self.booking_to_tool);
        self.notify.send(tool_id, event);
        Ok(())
    }

    /// Lookup booking → tool, get tool, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ToolState>), EngineError> {
        let tool_id = self
            .tool_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ts = self
            .get_tool(&tool_id)
            .ok_or(EngineError::NotFound(tool_id))?;
        let guard = ts.write_owned().await;
        Ok((tool_id, guard))
    }
}

/// Extract the tool id from an event (for non-ToolAdded events).
fn event_tool_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ToolUpdated { id, .. } => Some(*id),
        Event::BookingOpened { tool_id, .. } | Event::BookingStatusChanged { tool_id, .. } => {
            Some(*tool_id)
        }
        Event::ToolAdded { .. } => None,
    }
}
