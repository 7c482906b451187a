mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;
mod store;
mod validator;

pub use conflict::{check_overlap, Conflict};
pub use error::{EngineError, Policy, Rejection};
pub use pricing::{
    bookable_spans, merge_overlapping, price_for_stay, rolling_estimate, subtract_spans,
    InvalidReason, StayQuote,
};
pub use store::RangeStore;
pub use validator::{validate, Accepted, ReservationRequest, Stage};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::dates::Day;
use crate::model::*;
use crate::notify::{Notification, NotifyHub};
use crate::wal::Wal;

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while one fsync is running share the next one.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let _ = tx.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray bytes don't ride along with the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Every property, its price ranges and its reservations, backed by the WAL.
pub struct Engine {
    pub state: DashMap<Ulid, SharedPropertyState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Range id → property id.
    pub(super) range_index: DashMap<Ulid, Ulid>,
    /// Reservation id → property id.
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    /// Mutations hold it shared; compaction holds it exclusively so its snapshot
    /// cannot miss an append.
    pub(super) compaction_gate: RwLock<()>,
    clock: fn() -> Day,
}

/// Apply a per-property event to state the caller already holds the lock for.
/// Registration and removal live at the map level.
fn apply_to_property(
    ps: &mut PropertyState,
    event: &Event,
    range_index: &DashMap<Ulid, Ulid>,
    reservation_index: &DashMap<Ulid, Ulid>,
) -> Result<(), EngineError> {
    match event {
        Event::PropertyUpdated(facts) => ps.facts = facts.clone(),
        Event::RangeAdded { property_id, range } => {
            ps.ranges.insert(range.clone())?;
            range_index.insert(range.id, *property_id);
        }
        Event::RangesBulkAdded { property_id, ranges } => {
            let mut loaded = ps.ranges.clone();
            for range in ranges {
                loaded.insert(range.clone())?;
            }
            ps.ranges = loaded;
            for range in ranges {
                range_index.insert(range.id, *property_id);
            }
        }
        Event::RangeUpdated { range, .. } => ps.ranges.replace(range.clone())?,
        Event::RangeRemoved { id, .. } => {
            ps.ranges.delete(*id)?;
            range_index.remove(id);
        }
        Event::ReservationCreated(reservation) => {
            reservation_index.insert(reservation.id, reservation.property_id);
            ps.insert_reservation(reservation.clone());
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            ps.reservation_mut(*id).ok_or(EngineError::NotFound(*id))?.status = *status;
        }
        Event::PropertyRegistered(_) | Event::PropertyRemoved { .. } => {}
    }
    Ok(())
}

/// Who hears about an event, if anyone. Read after the event was applied.
fn notification_for(ps: &PropertyState, event: &Event) -> Option<(Ulid, Notification)> {
    match event {
        Event::ReservationCreated(r) => Some((ps.facts.host_id, Notification::requested(r))),
        Event::ReservationStatusChanged { id, .. } => ps
            .reservation(*id)
            .map(|r| (r.guest_id, Notification::status_changed(r))),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, crate::dates::today)
    }

    /// Like [`Engine::new`], with an explicit source for "today".
    pub fn with_clock(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: fn() -> Day,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            range_index: DashMap::new(),
            reservation_index: DashMap::new(),
            compaction_gate: RwLock::new(()),
            clock,
        };
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {} events from {}: {} properties",
            events.len(),
            wal_path.display(),
            engine.state.len()
        );
        Ok(engine)
    }

    // The engine is not shared yet, so try_write always succeeds. Blocking lock calls
    // are off limits here because this runs inside the runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::PropertyRegistered(facts) => {
                self.state
                    .insert(facts.id, Arc::new(RwLock::new(PropertyState::new(facts.clone()))));
            }
            Event::PropertyRemoved { id } => self.drop_property(*id),
            other => {
                let pid = other.property_id();
                let Some(shared) = self.get_property(&pid) else {
                    tracing::warn!("replay: event for unknown property {pid} skipped");
                    return;
                };
                let Ok(mut guard) = shared.try_write() else {
                    tracing::warn!("replay: property {pid} locked, event skipped");
                    return;
                };
                if let Err(e) =
                    apply_to_property(&mut guard, other, &self.range_index, &self.reservation_index)
                {
                    tracing::warn!("replay: event for property {pid} rejected: {e}");
                }
            }
        }
    }

    /// Remove a property and every index entry pointing at it.
    pub(super) fn drop_property(&self, id: Ulid) {
        self.state.remove(&id);
        self.range_index.retain(|_, pid| *pid != id);
        self.reservation_index.retain(|_, pid| *pid != id);
    }

    pub fn today(&self) -> Day {
        (self.clock)()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
    }

    pub(super) async fn wal_request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))
    }

    pub fn get_property(&self, id: &Ulid) -> Option<SharedPropertyState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Persist, then apply, then notify. The caller holds the property's write lock and
    /// has already checked that `event` applies cleanly.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut PropertyState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_property(ps, event, &self.range_index, &self.reservation_index)?;
        if let Some((recipient, notification)) = notification_for(ps, event) {
            self.notify.send(recipient, notification);
        }
        Ok(())
    }

    pub(super) async fn property_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<PropertyState>, EngineError> {
        let shared = self.get_property(&id).ok_or(EngineError::NotFound(id))?;
        let guard = shared.write_owned().await;
        // Removed while we waited for the lock.
        if !self.state.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    /// Lock the property that owns `entity_id` (a range or reservation).
    pub(super) async fn resolve_write(
        &self,
        index: &DashMap<Ulid, Ulid>,
        entity_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<PropertyState>, EngineError> {
        let property_id = index
            .get(&entity_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(entity_id))?;
        self.property_write(property_id).await
    }
}
