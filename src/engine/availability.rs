use std::collections::BTreeMap;

use ulid::Ulid;

use crate::layout::Layout;
use crate::model::*;

/// Remaining capacity of one table for a (date, slot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAvailability {
    pub id: TableId,
    pub floor: Floor,
    pub capacity: u32,
    pub shared: bool,
    pub booked: u32,
    pub remaining: u32,
}

/// Point-in-time view of one slot partition, derived from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilitySnapshot {
    pub open: bool,
    /// Same order as the layout (table id).
    pub tables: Vec<TableAvailability>,
    /// Distinct floors, ascending.
    pub floors: Vec<Floor>,
}

impl AvailabilitySnapshot {
    pub fn remaining_total(&self) -> u32 {
        self.tables.iter().map(|t| t.remaining).sum()
    }

    pub fn remaining_on(&self, floor: Floor) -> u32 {
        self.on_floor(floor).map(|t| t.remaining).sum()
    }

    pub fn on_floor(&self, floor: Floor) -> impl Iterator<Item = &TableAvailability> {
        self.tables.iter().filter(move |t| t.floor == floor)
    }

    pub fn floor_totals(&self) -> BTreeMap<Floor, u32> {
        self.floors
            .iter()
            .map(|&f| (f, self.remaining_on(f)))
            .collect()
    }

    pub fn get(&self, id: &TableId) -> Option<&TableAvailability> {
        self.tables.iter().find(|t| &t.id == id)
    }
}

/// Derive per-table remaining capacity.
///
/// A closed day reports zero everywhere. A non-shared table that already
/// seats a party is exhausted regardless of empty chairs. `exclude` hides one
/// reservation, so a modification can re-plan around its own seats.
pub fn snapshot(
    layout: &Layout,
    slot: Option<&SlotLedger>,
    open: bool,
    exclude: Option<&Ulid>,
) -> AvailabilitySnapshot {
    let tables = layout
        .tables()
        .iter()
        .map(|table| {
            let (booked, parties) = occupancy(slot, &table.id, exclude);
            let remaining = if !open || (!table.shared && parties > 0) {
                0
            } else {
                table.capacity.saturating_sub(booked)
            };
            TableAvailability {
                id: table.id.clone(),
                floor: table.floor,
                capacity: table.capacity,
                shared: table.shared,
                booked,
                remaining,
            }
        })
        .collect();

    AvailabilitySnapshot {
        open,
        tables,
        floors: layout.floors().to_vec(),
    }
}

/// Seats taken and parties seated at `table`, ignoring `exclude`.
pub(crate) fn occupancy(
    slot: Option<&SlotLedger>,
    table: &TableId,
    exclude: Option<&Ulid>,
) -> (u32, usize) {
    let Some(slot) = slot else { return (0, 0) };
    slot.active()
        .filter(|r| Some(&r.id) != exclude)
        .map(|r| r.seats_at(table))
        .filter(|&seats| seats > 0)
        .fold((0, 0), |(booked, parties), seats| (booked + seats, parties + 1))
}

/// Whether `floor` alone can seat `pax`: one table or a same-floor combination.
pub fn floor_feasible(snapshot: &AvailabilitySnapshot, floor: Floor, pax: u32) -> bool {
    snapshot.open && pax > 0 && snapshot.remaining_on(floor) >= pax
}

/// Floors that could seat the whole party on their own, ascending.
pub fn feasible_floors(snapshot: &AvailabilitySnapshot, pax: u32) -> Vec<Floor> {
    snapshot
        .floors
        .iter()
        .copied()
        .filter(|&f| floor_feasible(snapshot, f, pax))
        .collect()
}

pub fn available_floors(snapshot: &AvailabilitySnapshot, pax: u32) -> BTreeMap<Floor, bool> {
    snapshot
        .floors
        .iter()
        .map(|&f| (f, floor_feasible(snapshot, f, pax)))
        .collect()
}
