use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Floor number as printed on the venue signage (`2F`, `3F`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Floor(pub u8);

impl fmt::Display for Floor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}F", self.0)
    }
}

/// Physical table label, e.g. `2F-B1`. Ordering is lexicographic and is the
/// tie-breaker everywhere the planner needs a deterministic choice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub String);

impl TableId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub floor: Floor,
    pub capacity: u32,
    /// Several independent parties may sit here at once, up to `capacity`.
    #[serde(default)]
    pub shared: bool,
}

/// One table's share of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seating {
    pub table_id: TableId,
    pub floor: Floor,
    pub seats: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub guest_id: String,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub date: NaiveDate,
    pub slot: NaiveTime,
    pub pax: u32,
    pub status: ReservationStatus,
    /// Non-empty; seats sum to `pax`.
    pub seating: Vec<Seating>,
    /// Guest consented to being seated across floors.
    pub split_floor: bool,
    pub guest: Option<Guest>,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.seating.iter().map(|s| s.table_id.clone()).collect()
    }

    /// Distinct floors, ascending.
    pub fn floors(&self) -> Vec<Floor> {
        let mut floors: Vec<Floor> = self.seating.iter().map(|s| s.floor).collect();
        floors.sort();
        floors.dedup();
        floors
    }

    pub fn seats_at(&self, table: &TableId) -> u32 {
        self.seating
            .iter()
            .filter(|s| &s.table_id == table)
            .map(|s| s.seats)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub date: NaiveDate,
    pub reason: Option<String>,
}

// ── Requests ─────────────────────────────────────────────────────

/// Everything the planner needs to seat a party. Nothing else is consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub pax: u32,
    pub date: NaiveDate,
    pub slot: NaiveTime,
    #[serde(default)]
    pub floor_preference: Option<Floor>,
    #[serde(default)]
    pub allow_split: bool,
}

impl BookingRequest {
    pub fn new(pax: u32, date: NaiveDate, slot: NaiveTime) -> Self {
        Self {
            pax,
            date,
            slot,
            floor_preference: None,
            allow_split: false,
        }
    }

    pub fn prefer_floor(mut self, floor: Floor) -> Self {
        self.floor_preference = Some(floor);
        self
    }

    pub fn allow_split(mut self, allow: bool) -> Self {
        self.allow_split = allow;
        self
    }
}

/// Changes to an existing reservation. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyRequest {
    #[serde(default)]
    pub pax: Option<u32>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub slot: Option<NaiveTime>,
    #[serde(default)]
    pub floor_preference: Option<Floor>,
    #[serde(default)]
    pub allow_split: bool,
}

// ── Outcomes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationSignal {
    /// Preferred floor cannot hold the party; another floor can.
    FloorFull,
    /// No single floor can hold the party; the venue can if split.
    SplitFloorRequired,
}

impl NegotiationSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationSignal::FloorFull => "floor_full",
            NegotiationSignal::SplitFloorRequired => "split_floor_required",
        }
    }
}

impl fmt::Display for NegotiationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller needs to re-ask the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationContext {
    pub pax: u32,
    pub requested_floor: Option<Floor>,
    /// Floors that could seat the whole party on their own.
    pub feasible_floors: Vec<Floor>,
    pub remaining_total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PastDate,
    ClosedDay,
    OutsideHours,
    CapacityExceeded,
    RetryExhausted,
    InvalidRequest,
    NotFound,
    Storage,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PastDate => "past_date",
            FailureKind::ClosedDay => "closed_day",
            FailureKind::OutsideHours => "outside_hours",
            FailureKind::CapacityExceeded => "capacity_exceeded",
            FailureKind::RetryExhausted => "retry_exhausted",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::NotFound => "not_found",
            FailureKind::Storage => "storage",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `book` and `modify`. Always returned by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BookOutcome {
    Confirmed {
        reservation_id: Ulid,
        table_ids: Vec<TableId>,
        floor_ids: Vec<Floor>,
        seating: Vec<Seating>,
    },
    Negotiation {
        signal: NegotiationSignal,
        context: NegotiationContext,
    },
    Failure {
        kind: FailureKind,
    },
}

impl BookOutcome {
    pub fn failure(kind: FailureKind) -> Self {
        BookOutcome::Failure { kind }
    }

    pub fn confirmed(reservation: &Reservation) -> Self {
        BookOutcome::Confirmed {
            reservation_id: reservation.id,
            table_ids: reservation.table_ids(),
            floor_ids: reservation.floors(),
            seating: reservation.seating.clone(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, BookOutcome::Confirmed { .. })
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BookOutcome::Confirmed { .. } => "confirmed",
            BookOutcome::Negotiation { signal, .. } => signal.as_str(),
            BookOutcome::Failure { kind } => kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled {
        reservation_id: Ulid,
        date: NaiveDate,
        slot: NaiveTime,
    },
    NotFound,
    Failure {
        kind: FailureKind,
    },
}

impl CancelOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CancelOutcome::Cancelled { .. } => "cancelled",
            CancelOutcome::NotFound => "not_found",
            CancelOutcome::Failure { kind } => kind.as_str(),
        }
    }
}

// ── Ledger state ─────────────────────────────────────────────────

/// All reservations for one (date, slot) partition.
#[derive(Debug, Clone, Default)]
pub struct SlotLedger {
    /// Commit order. Cancelled reservations stay for lookups.
    pub reservations: Vec<Reservation>,
}

impl SlotLedger {
    pub fn active(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.is_active())
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| &r.id == id)
    }

    pub fn insert(&mut self, reservation: Reservation) {
        self.reservations.push(reservation);
    }

    /// Mark a confirmed reservation cancelled. `None` if absent or already cancelled.
    pub fn cancel(&mut self, id: &Ulid, at: NaiveDateTime) -> Option<&Reservation> {
        let pos = self
            .reservations
            .iter()
            .position(|r| &r.id == id && r.is_active())?;
        let r = &mut self.reservations[pos];
        r.status = ReservationStatus::Cancelled;
        r.updated_at = Some(at);
        Some(&self.reservations[pos])
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| &r.id == id)?;
        Some(self.reservations.remove(pos))
    }
}

/// One calendar day of the ledger: its closure flag plus every slot partition.
/// Locked as a unit so a closure and a commit never interleave.
#[derive(Debug, Clone)]
pub struct DayLedger {
    pub date: NaiveDate,
    pub closure: Option<Closure>,
    pub slots: BTreeMap<NaiveTime, SlotLedger>,
}

impl DayLedger {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            closure: None,
            slots: BTreeMap::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closure.is_some()
    }

    pub fn slot(&self, slot: NaiveTime) -> Option<&SlotLedger> {
        self.slots.get(&slot)
    }

    pub fn slot_mut(&mut self, slot: NaiveTime) -> &mut SlotLedger {
        self.slots.entry(slot).or_default()
    }

    pub fn find(&self, id: &Ulid) -> Option<&Reservation> {
        self.slots.values().find_map(|s| s.get(id))
    }

    pub fn active_count(&self) -> usize {
        self.slots.values().map(|s| s.active().count()).sum()
    }
}

/// The WAL record format. Replaying these in order rebuilds the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationConfirmed {
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        date: NaiveDate,
        slot: NaiveTime,
        at: NaiveDateTime,
    },
    /// Cancel-then-rebook in one record: `reservation` replaces the entry
    /// with the same id that lived at `from_date`/`from_slot`.
    ReservationModified {
        from_date: NaiveDate,
        from_slot: NaiveTime,
        reservation: Reservation,
    },
    ClosureAdded {
        date: NaiveDate,
        reason: Option<String>,
    },
    ClosureRemoved {
        date: NaiveDate,
    },
    DayPurged {
        date: NaiveDate,
    },
}

impl Event {
    /// Day partition the event lands in.
    pub fn date(&self) -> NaiveDate {
        match self {
            Event::ReservationConfirmed { reservation }
            | Event::ReservationModified { reservation, .. } => reservation.date,
            Event::ReservationCancelled { date, .. }
            | Event::ClosureAdded { date, .. }
            | Event::ClosureRemoved { date }
            | Event::DayPurged { date } => *date,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub open: bool,
    pub remaining_total: u32,
    /// Seats still free on each floor.
    pub remaining_by_floor: BTreeMap<Floor, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatedParty {
    pub reservation_id: Ulid,
    pub guest_name: Option<String>,
    pub seats: u32,
}

/// One table on the admin seating map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOccupancy {
    pub table_id: TableId,
    pub floor: Floor,
    pub capacity: u32,
    pub shared: bool,
    pub booked: u32,
    pub parties: Vec<SeatedParty>,
    /// One entry per chair; filled in booking order, empty chairs are `None`.
    pub seat_map: Vec<Option<Ulid>>,
}
