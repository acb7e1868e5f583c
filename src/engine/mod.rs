mod availability;
mod catalog;
mod error;
mod mutations;
mod queries;
mod recurrence;
mod validate;

pub use availability::{
    day_slots, extend_selection, free_windows, merge_overlapping, subtract_intervals,
};
pub use catalog::ResourceCatalog;
pub use error::{EngineError, StateError, ValidationError};
pub use mutations::{BookingRequest, CreateOutcome, ResourceDraft, SkippedOccurrence};
pub use recurrence::expand;
pub use validate::{validate_booking, Candidate};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicI32;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Per-tenant scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub calendar: Calendar,
    /// Slot grid granularity in minutes.
    pub slot_minutes: u32,
    /// How long before a booking starts its reminder goes out.
    pub reminder_lead_minutes: u32,
    /// Local hour from which the day's booking summaries go out.
    pub summary_hour: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            calendar: Calendar::UTC,
            slot_minutes: 30,
            reminder_lead_minutes: 30,
            summary_hour: 8,
        }
    }
}

impl EngineSettings {
    pub fn slot_ms(&self) -> Ms {
        self.slot_minutes as Ms * MINUTE_MS
    }
}

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes don't leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
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
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// In-memory booking state of one tenant, backed by its WAL.
pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → resource id
    pub(super) booking_to_resource: DashMap<Ulid, Ulid>,
    pub(super) settings: EngineSettings,
    /// Held while registering resources and while snapshotting for compaction.
    pub(super) catalog_lock: Mutex<()>,
    /// Bookings already reminded, with their start time.
    pub(super) reminded: DashMap<Ulid, Ms>,
    /// Day number (from CE) of the last local date summarized.
    pub(super) summarized_day: AtomicI32,
}

/// Apply an event directly to a ResourceState (no locking; caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ResourceUpdated { resource } => {
            rs.resource = resource.clone();
        }
        Event::ResourceDeactivated { .. } => {
            rs.resource.active = false;
        }
        Event::BookingCreated { booking } => {
            // a retried append may have reached disk twice
            if rs.booking(&booking.id).is_none() {
                rs.insert_booking(booking.clone());
            }
            booking_map.insert(booking.id, booking.resource_id);
        }
        Event::BookingExtended { id, ends_at, .. } => {
            if let Some(b) = rs.booking_mut(id) {
                b.span.end = *ends_at;
            }
        }
        Event::BookingCancelled { id, .. } => {
            if let Some(b) = rs.booking_mut(id) {
                b.status = BookingStatus::Cancelled;
            }
        }
        // Registration is handled at the DashMap level
        Event::ResourceRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_settings(wal_path, notify, EngineSettings::default())
    }

    pub fn with_settings(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            booking_to_resource: DashMap::new(),
            settings,
            catalog_lock: Mutex::new(()),
            reminded: DashMap::new(),
            summarized_day: AtomicI32::new(i32::MIN),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never block here: this may run inside an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::ResourceRegistered { resource } => {
                    let rs = ResourceState::new(resource.clone());
                    engine.state.insert(resource.id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    let Some(rs) = engine.resource_state(&other.resource_id()) else {
                        warn!(
                            resource_id = %other.resource_id(),
                            "replay: event for unknown resource"
                        );
                        continue;
                    };
                    let mut guard = rs
                        .try_write()
                        .map_err(|_| io::Error::other("replay: resource state locked"))?;
                    apply_to_resource(&mut guard, other, &engine.booking_to_resource);
                }
            }
        }

        Ok(engine)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn calendar(&self) -> &Calendar {
        &self.settings.calendar
    }

    async fn wal_send(&self, event: &Event) -> Result<(), EngineError> {
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

    /// Write event to WAL via the background group-commit writer, retrying once.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        match self.wal_send(event).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(
                    error = %first,
                    resource_id = %event.resource_id(),
                    "WAL append failed, retrying"
                );
                self.wal_send(event).await
            }
        }
    }

    pub fn resource_state(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_resource.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.booking_to_resource);
        self.notify.committed(event);
        Ok(())
    }

    /// Lookup booking → resource, acquire that resource's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self
            .resource_for_booking(booking_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        Ok(rs.write_owned().await)
    }

    pub(super) async fn resolve_booking_read(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<ResourceState>, EngineError> {
        let resource_id = self
            .resource_for_booking(booking_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        Ok(rs.read_owned().await)
    }
}
