use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    BOOKINGS_TOTAL, BOOKING_DURATION_SECONDS, CANCELLATIONS_TOTAL, COMMIT_ATTEMPTS,
    COMMIT_CONFLICTS_TOTAL, MODIFICATIONS_TOTAL, RESERVATIONS_PURGED_TOTAL, WAL_COMPACTIONS_TOTAL,
};

use super::commit::{is_past, now_local, validate_seating};
use super::planner::{self, Decision, Plan};
use super::{apply_to_day, unindex_day, Engine, EngineError, WalCommand};

/// How a failed commit attempt is reported to the caller.
fn failure_for(err: &EngineError) -> FailureKind {
    match err {
        EngineError::DayClosed(_) => FailureKind::ClosedDay,
        EngineError::LimitExceeded(_) => FailureKind::CapacityExceeded,
        EngineError::InvalidInput(_) => FailureKind::InvalidRequest,
        _ => FailureKind::Storage,
    }
}

fn validate_guest(guest: Option<&Guest>) -> Result<(), FailureKind> {
    let Some(g) = guest else { return Ok(()) };
    let too_long = [Some(&g.guest_id), Some(&g.name), g.phone.as_ref()]
        .into_iter()
        .flatten()
        .any(|f| f.len() > MAX_GUEST_FIELD_LEN);
    if too_long || g.guest_id.is_empty() {
        return Err(FailureKind::InvalidRequest);
    }
    Ok(())
}

/// Sleeps between commit attempts: 5ms, 10ms, 20ms ... capped.
struct Backoff {
    next_ms: u64,
}

impl Backoff {
    fn new() -> Self {
        Self {
            next_ms: COMMIT_BACKOFF_BASE_MS,
        }
    }

    async fn wait(&mut self) {
        tokio::time::sleep(Duration::from_millis(self.next_ms)).await;
        self.next_ms = (self.next_ms * 2).min(COMMIT_BACKOFF_MAX_MS);
    }
}

impl Engine {
    /// Pre-checks that need no ledger read. Special closures are only
    /// visible under the day lock and are caught later.
    pub(super) fn gate(&self, request: &BookingRequest, now: NaiveDateTime) -> Result<(), FailureKind> {
        if request.pax == 0 || request.pax > MAX_PAX {
            return Err(FailureKind::InvalidRequest);
        }
        if !self.venue.slot_aligned(request.slot) {
            return Err(FailureKind::InvalidRequest);
        }
        if let Some(floor) = request.floor_preference
            && !self.venue.layout.has_floor(floor)
        {
            return Err(FailureKind::InvalidRequest);
        }
        if is_past(request.date, request.slot, now) {
            return Err(FailureKind::PastDate);
        }
        if !self.venue.hours.is_open_on(request.date) {
            return Err(FailureKind::ClosedDay);
        }
        if !self.venue.hours.admits(request.date, request.slot) {
            return Err(FailureKind::OutsideHours);
        }
        Ok(())
    }

    pub async fn book(&self, request: &BookingRequest) -> BookOutcome {
        self.book_for(request, None).await
    }

    /// Seat a party. Never errors: every result, including storage trouble,
    /// comes back as an outcome.
    pub async fn book_for(&self, request: &BookingRequest, guest: Option<Guest>) -> BookOutcome {
        let started = Instant::now();
        let outcome = self.book_with_retry(request, guest).await;
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome.label()).increment(1);
        metrics::histogram!(BOOKING_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        debug!(
            pax = request.pax,
            date = %request.date,
            slot = %request.slot,
            outcome = outcome.label(),
            "book"
        );
        outcome
    }

    async fn book_with_retry(&self, request: &BookingRequest, guest: Option<Guest>) -> BookOutcome {
        if let Err(kind) = self.gate(request, now_local()) {
            return BookOutcome::failure(kind);
        }
        if let Err(kind) = validate_guest(guest.as_ref()) {
            return BookOutcome::failure(kind);
        }

        let mut backoff = Backoff::new();
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let snapshot = self.snapshot_for(request.date, request.slot, None).await;
            let plan = match planner::plan(request, &snapshot) {
                Decision::Plan(plan) => plan,
                Decision::Negotiate(signal, context) => {
                    return BookOutcome::Negotiation { signal, context };
                }
                Decision::Fail(kind) => return BookOutcome::failure(kind),
            };

            #[cfg(test)]
            self.run_before_commit(&plan).await;

            match self.commit_new(request, guest.clone(), &plan).await {
                Ok(reservation) => {
                    metrics::histogram!(COMMIT_ATTEMPTS).record(attempt as f64);
                    info!(
                        id = %reservation.id,
                        pax = reservation.pax,
                        stage = plan.stage.as_str(),
                        tables = ?reservation.table_ids(),
                        "reservation confirmed"
                    );
                    return BookOutcome::confirmed(&reservation);
                }
                Err(e) if e.is_retryable() => {
                    metrics::counter!(COMMIT_CONFLICTS_TOTAL).increment(1);
                    debug!(attempt, error = %e, "commit conflict, replanning");
                    if attempt < MAX_COMMIT_ATTEMPTS {
                        backoff.wait().await;
                    }
                }
                Err(e) => {
                    let kind = failure_for(&e);
                    if kind == FailureKind::Storage {
                        error!(error = %e, "booking commit failed");
                    }
                    return BookOutcome::failure(kind);
                }
            }
        }

        warn!(
            pax = request.pax,
            date = %request.date,
            slot = %request.slot,
            "booking gave up after repeated conflicts"
        );
        BookOutcome::failure(FailureKind::RetryExhausted)
    }

    /// Commit a freshly planned reservation.
    ///
    /// The snapshot the plan came from may be stale, so the seating is
    /// re-validated against the ledger under the day's write lock.
    pub(crate) async fn commit_new(
        &self,
        request: &BookingRequest,
        guest: Option<Guest>,
        plan: &Plan,
    ) -> Result<Reservation, EngineError> {
        if plan.seats() != request.pax {
            return Err(EngineError::InvalidInput("plan does not seat the party"));
        }
        let _gate = self.compaction_gate.read().await;
        let mut day = self.lock_day(request.date).await;
        if day.is_closed() {
            return Err(EngineError::DayClosed(request.date));
        }
        let slot = day.slot(request.slot);
        if slot.is_some_and(|s| s.reservations.len() >= MAX_RESERVATIONS_PER_SLOT) {
            return Err(EngineError::LimitExceeded("too many reservations in slot"));
        }
        validate_seating(&self.venue.layout, slot, &plan.seating, None)?;

        let reservation = Reservation {
            id: Ulid::new(),
            date: request.date,
            slot: request.slot,
            pax: request.pax,
            status: ReservationStatus::Confirmed,
            seating: plan.seating.clone(),
            split_floor: plan.spans_floors(),
            guest,
            created_at: now_local(),
            updated_at: None,
        };
        let event = Event::ReservationConfirmed {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut day, &event).await?;
        Ok(reservation)
    }

    #[cfg(test)]
    async fn run_before_commit(&self, plan: &Plan) {
        let Some(rival) = self.before_commit.get().and_then(|hook| hook(plan)) else {
            return;
        };
        let _gate = self.compaction_gate.read().await;
        let mut day = self.lock_day(rival.date).await;
        let event = Event::ReservationConfirmed { reservation: rival };
        self.persist_and_apply(&mut day, &event)
            .await
            .expect("rival commit");
    }

    /// Release a reservation's seats. Cancelling twice, or cancelling an
    /// unknown id, yields `NotFound` and changes nothing.
    pub async fn cancel(&self, id: Ulid) -> CancelOutcome {
        let outcome = match self.cancel_inner(id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%id, error = %e, "cancel failed");
                CancelOutcome::Failure {
                    kind: failure_for(&e),
                }
            }
        };
        metrics::counter!(CANCELLATIONS_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn cancel_inner(&self, id: Ulid) -> Result<CancelOutcome, EngineError> {
        let _gate = self.compaction_gate.read().await;
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let Some(date) = self.index.get(&id).map(|e| *e.value()) else {
                return Ok(CancelOutcome::NotFound);
            };
            let Some(day) = self.get_day(date) else {
                return Ok(CancelOutcome::NotFound);
            };
            let mut day = day.write().await;
            let Some(found) = day.find(&id) else {
                // Moved to another day by a concurrent modify: follow it.
                if self.index.get(&id).is_some_and(|e| *e.value() != date) {
                    continue;
                }
                return Ok(CancelOutcome::NotFound);
            };
            if !found.is_active() {
                return Ok(CancelOutcome::NotFound);
            }
            let slot = found.slot;
            let event = Event::ReservationCancelled {
                id,
                date,
                slot,
                at: now_local(),
            };
            self.persist_and_apply(&mut day, &event).await?;
            info!(%id, %date, %slot, "reservation cancelled");
            return Ok(CancelOutcome::Cancelled {
                reservation_id: id,
                date,
                slot,
            });
        }
        Ok(CancelOutcome::NotFound)
    }

    /// Re-plan an existing reservation with new parameters.
    ///
    /// Atomic: either the reservation is replaced in place (same id) or it is
    /// left exactly as it was. Unset fields keep their current value.
    pub async fn modify(&self, id: Ulid, changes: &ModifyRequest) -> BookOutcome {
        let outcome = self.modify_with_retry(id, changes).await;
        metrics::counter!(MODIFICATIONS_TOTAL, "outcome" => outcome.label()).increment(1);
        debug!(%id, outcome = outcome.label(), "modify");
        outcome
    }

    async fn modify_with_retry(&self, id: Ulid, changes: &ModifyRequest) -> BookOutcome {
        let mut backoff = Backoff::new();
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let Some(current) = self.get_reservation(id).await.filter(|r| r.is_active()) else {
                return BookOutcome::failure(FailureKind::NotFound);
            };
            let request = BookingRequest {
                pax: changes.pax.unwrap_or(current.pax),
                date: changes.date.unwrap_or(current.date),
                slot: changes.slot.unwrap_or(current.slot),
                floor_preference: changes.floor_preference,
                allow_split: changes.allow_split,
            };
            let same_floor = match request.floor_preference {
                None => true,
                Some(floor) => current.floors() == [floor],
            };
            if request.pax == current.pax
                && request.date == current.date
                && request.slot == current.slot
                && same_floor
            {
                return BookOutcome::confirmed(&current);
            }
            if let Err(kind) = self.gate(&request, now_local()) {
                return BookOutcome::failure(kind);
            }

            let snapshot = self.snapshot_for(request.date, request.slot, Some(&id)).await;
            let plan = match planner::plan(&request, &snapshot) {
                Decision::Plan(plan) => plan,
                Decision::Negotiate(signal, context) => {
                    return BookOutcome::Negotiation { signal, context };
                }
                Decision::Fail(kind) => return BookOutcome::failure(kind),
            };

            match self.commit_modify(&current, &request, &plan).await {
                Ok(updated) => {
                    info!(
                        %id,
                        from = %current.date.and_time(current.slot),
                        to = %updated.date.and_time(updated.slot),
                        pax = updated.pax,
                        "reservation modified"
                    );
                    return BookOutcome::confirmed(&updated);
                }
                Err(e) if e.is_retryable() => {
                    metrics::counter!(COMMIT_CONFLICTS_TOTAL).increment(1);
                    debug!(attempt, error = %e, "modify conflict, replanning");
                    if attempt < MAX_COMMIT_ATTEMPTS {
                        backoff.wait().await;
                    }
                }
                Err(e) => {
                    let kind = failure_for(&e);
                    if kind == FailureKind::Storage {
                        error!(%id, error = %e, "modify commit failed");
                    }
                    return BookOutcome::failure(kind);
                }
            }
        }
        BookOutcome::failure(FailureKind::RetryExhausted)
    }

    /// Swap `current` for the re-planned reservation in one WAL record.
    /// Both day locks are taken in date order.
    async fn commit_modify(
        &self,
        current: &Reservation,
        request: &BookingRequest,
        plan: &Plan,
    ) -> Result<Reservation, EngineError> {
        if plan.seats() != request.pax {
            return Err(EngineError::InvalidInput("plan does not seat the party"));
        }
        let _gate = self.compaction_gate.read().await;
        let (mut source, mut target) = if request.date == current.date {
            (self.lock_day(current.date).await, None)
        } else if request.date < current.date {
            let target = self.lock_day(request.date).await;
            (self.lock_day(current.date).await, Some(target))
        } else {
            let source = self.lock_day(current.date).await;
            (source, Some(self.lock_day(request.date).await))
        };

        let unchanged = source
            .slot(current.slot)
            .and_then(|s| s.get(&current.id))
            .is_some_and(|r| r.is_active() && r == current);
        if !unchanged {
            return Err(EngineError::Stale(current.id));
        }

        let landing: &DayLedger = target.as_deref().unwrap_or(&*source);
        if landing.is_closed() {
            return Err(EngineError::DayClosed(request.date));
        }
        let slot = landing.slot(request.slot);
        if slot.is_some_and(|s| s.reservations.len() >= MAX_RESERVATIONS_PER_SLOT) {
            return Err(EngineError::LimitExceeded("too many reservations in slot"));
        }
        validate_seating(&self.venue.layout, slot, &plan.seating, Some(&current.id))?;

        let updated = Reservation {
            date: request.date,
            slot: request.slot,
            pax: request.pax,
            seating: plan.seating.clone(),
            split_floor: plan.spans_floors(),
            updated_at: Some(now_local()),
            ..current.clone()
        };
        let event = Event::ReservationModified {
            from_date: current.date,
            from_slot: current.slot,
            reservation: updated.clone(),
        };
        self.wal_append(&event).await?;
        apply_to_day(&mut source, &event, &self.index);
        if let Some(target) = target.as_mut() {
            apply_to_day(target, &event, &self.index);
        }
        Ok(updated)
    }

    // ── Closures ─────────────────────────────────────────

    /// Close a whole day. Refused while it still holds confirmed reservations.
    pub async fn add_closure(
        &self,
        date: NaiveDate,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_CLOSURE_REASON_LEN) {
            return Err(EngineError::LimitExceeded("closure reason too long"));
        }
        if date < now_local().date() {
            return Err(EngineError::InvalidInput("closure date is in the past"));
        }
        let _gate = self.compaction_gate.read().await;
        let mut day = self.lock_day(date).await;
        if day.is_closed() {
            return Err(EngineError::AlreadyClosed(date));
        }
        let active = day.active_count();
        if active > 0 {
            return Err(EngineError::HasReservations { date, active });
        }
        self.persist_and_apply(&mut day, &Event::ClosureAdded { date, reason })
            .await?;
        info!(%date, "closure added");
        Ok(())
    }

    pub async fn remove_closure(&self, date: NaiveDate) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let Some(day) = self.get_day(date) else {
            return Err(EngineError::NotClosed(date));
        };
        let mut day = day.write().await;
        if !day.is_closed() {
            return Err(EngineError::NotClosed(date));
        }
        self.persist_and_apply(&mut day, &Event::ClosureRemoved { date })
            .await?;
        info!(%date, "closure removed");
        Ok(())
    }

    // ── Housekeeping ─────────────────────────────────────

    /// Drop every day strictly before `cutoff`, closures included.
    /// Returns how many reservations (any status) were removed.
    pub async fn purge_before(&self, cutoff: NaiveDate) -> Result<usize, EngineError> {
        if cutoff > now_local().date() {
            return Err(EngineError::InvalidInput("purge cutoff is in the future"));
        }
        let _gate = self.compaction_gate.read().await;
        let mut dates: Vec<NaiveDate> = self
            .days
            .iter()
            .map(|e| *e.key())
            .filter(|d| *d < cutoff)
            .collect();
        dates.sort();

        let mut purged = 0;
        for date in dates {
            let Some(day) = self.get_day(date) else { continue };
            let guard = day.write().await;
            self.wal_append(&Event::DayPurged { date }).await?;
            purged += guard.slots.values().map(|s| s.reservations.len()).sum::<usize>();
            unindex_day(&guard, &self.index);
            self.days.remove_if(&date, |_, d| Arc::ptr_eq(d, &day));
        }
        if purged > 0 {
            metrics::counter!(RESERVATIONS_PURGED_TOTAL).increment(purged as u64);
            info!(%cutoff, purged, "purged past reservations");
        }
        Ok(purged)
    }

    /// Rewrite the WAL as the minimal event set for the current ledger.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut events = Vec::new();
        for day in self.all_days() {
            let day = day.read().await;
            if let Some(closure) = &day.closure {
                events.push(Event::ClosureAdded {
                    date: closure.date,
                    reason: closure.reason.clone(),
                });
            }
            for slot in day.slots.values() {
                events.extend(slot.reservations.iter().map(|r| Event::ReservationConfirmed {
                    reservation: r.clone(),
                }));
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
