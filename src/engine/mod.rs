mod availability;
mod commit;
mod error;
mod mutations;
mod planner;
mod queries;

pub use availability::{
    available_floors, feasible_floors, floor_feasible, snapshot, AvailabilitySnapshot,
    TableAvailability,
};
pub use error::EngineError;
pub use planner::{plan, Decision, Plan, Stage};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::Venue;
use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub type SharedDay = Arc<RwLock<DayLedger>>;

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

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that arrive together share one fsync:
/// block for the first, drain whatever else is queued, flush once, answer all.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
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
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so no half-written batch lingers in
    // the buffer; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
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

// ── Engine ───────────────────────────────────────────────

/// The reservation ledger: one lockable partition per calendar day.
///
/// Every read goes through a day's read lock and every commit through its
/// write lock, so a closure and a booking for the same day are serialized.
/// Bookings themselves run optimistically: plan against a snapshot, then
/// re-validate under the write lock and retry on conflict.
pub struct Engine {
    pub venue: Arc<Venue>,
    pub(super) days: DashMap<NaiveDate, SharedDay>,
    /// Reservation id → the day it lives in.
    pub(super) index: DashMap<Ulid, NaiveDate>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold the read side for their whole commit; compaction takes
    /// the write side so its snapshot and the log rewrite see the same state.
    /// Always acquired before any day lock.
    pub(super) compaction_gate: RwLock<()>,
    #[cfg(test)]
    pub(super) before_commit: std::sync::OnceLock<CommitHook>,
}

/// Runs between planning and commit; a returned reservation is committed
/// first, as if another client had won the race.
#[cfg(test)]
pub(super) type CommitHook = Box<dyn Fn(&Plan) -> Option<Reservation> + Send + Sync>;

/// Apply an event to one day (caller holds the lock).
///
/// A modification that moves a reservation to another day is applied to
/// both days: the source side drops the old entry, the target side inserts
/// the new one. `DayPurged` is handled by the caller.
fn apply_to_day(day: &mut DayLedger, event: &Event, index: &DashMap<Ulid, NaiveDate>) {
    match event {
        Event::ReservationConfirmed { reservation } => {
            index.insert(reservation.id, reservation.date);
            day.slot_mut(reservation.slot).insert(reservation.clone());
        }
        Event::ReservationCancelled { id, slot, at, .. } => {
            day.slot_mut(*slot).cancel(id, *at);
        }
        Event::ReservationModified {
            from_date,
            from_slot,
            reservation,
        } => {
            if *from_date == day.date {
                day.slot_mut(*from_slot).remove(&reservation.id);
            }
            if reservation.date == day.date {
                index.insert(reservation.id, reservation.date);
                day.slot_mut(reservation.slot).insert(reservation.clone());
            }
        }
        Event::ClosureAdded { date, reason } => {
            day.closure = Some(Closure {
                date: *date,
                reason: reason.clone(),
            });
        }
        Event::ClosureRemoved { .. } => {
            day.closure = None;
        }
        Event::DayPurged { .. } => {}
    }
}

/// Forget every reservation id a purged day held.
fn unindex_day(day: &DayLedger, index: &DashMap<Ulid, NaiveDate>) {
    for r in day.slots.values().flat_map(|s| s.reservations.iter()) {
        index.remove_if(&r.id, |_, date| *date == day.date);
    }
}

/// Rebuild the ledger from the journal without any locking.
fn rebuild(events: &[Event], index: &DashMap<Ulid, NaiveDate>) -> HashMap<NaiveDate, DayLedger> {
    let mut days: HashMap<NaiveDate, DayLedger> = HashMap::new();
    for event in events {
        match event {
            Event::DayPurged { date } => {
                if let Some(day) = days.remove(date) {
                    unindex_day(&day, index);
                }
            }
            Event::ReservationModified { from_date, .. } if *from_date != event.date() => {
                for date in [*from_date, event.date()] {
                    let day = days.entry(date).or_insert_with(|| DayLedger::new(date));
                    apply_to_day(day, event, index);
                }
            }
            other => {
                let date = other.date();
                let day = days.entry(date).or_insert_with(|| DayLedger::new(date));
                apply_to_day(day, other, index);
            }
        }
    }
    days
}

impl Engine {
    /// Replay the journal at `wal_path` and start the writer task.
    /// Must be called from within a Tokio runtime.
    pub fn new(wal_path: PathBuf, venue: Arc<Venue>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!(path = %wal_path.display(), "discarded torn or corrupt WAL tail");
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let index = DashMap::new();
        let days: DashMap<NaiveDate, SharedDay> = rebuild(&replay.events, &index)
            .into_iter()
            .map(|(date, day)| (date, Arc::new(RwLock::new(day))))
            .collect();

        info!(
            events = replay.events.len(),
            days = days.len(),
            reservations = index.len(),
            "ledger replayed"
        );

        Ok(Self {
            venue,
            days,
            index,
            wal_tx,
            compaction_gate: RwLock::new(()),
            #[cfg(test)]
            before_commit: std::sync::OnceLock::new(),
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
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DayLedger,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event, &self.index);
        Ok(())
    }

    pub(super) fn get_day(&self, date: NaiveDate) -> Option<SharedDay> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    /// Write-lock the live ledger for `date`, creating it if needed.
    ///
    /// A purge may drop the day from the map while we wait for its lock;
    /// in that case start over on the fresh entry.
    pub(super) async fn lock_day(&self, date: NaiveDate) -> OwnedRwLockWriteGuard<DayLedger> {
        loop {
            let day = self
                .days
                .entry(date)
                .or_insert_with(|| Arc::new(RwLock::new(DayLedger::new(date))))
                .value()
                .clone();
            let guard = day.clone().write_owned().await;
            let live = self
                .days
                .get(&date)
                .is_some_and(|e| Arc::ptr_eq(e.value(), &day));
            if live {
                return guard;
            }
        }
    }

    /// Every day partition, in date order. No map guard is held on return.
    pub(super) fn all_days(&self) -> Vec<SharedDay> {
        let mut days: Vec<(NaiveDate, SharedDay)> = self
            .days
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        days.sort_by_key(|(date, _)| *date);
        days.into_iter().map(|(_, day)| day).collect()
    }

    pub fn day_count(&self) -> usize {
        self.days.len()
    }
}
