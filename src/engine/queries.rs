use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::availability::{self, AvailabilitySnapshot};
use super::commit::{is_past, now_local};
use super::Engine;

impl Engine {
    /// Special closures first, then the weekly schedule.
    fn slot_open(&self, day: Option<&DayLedger>, date: NaiveDate, slot: NaiveTime) -> bool {
        !day.is_some_and(|d| d.is_closed()) && self.venue.hours.admits(date, slot)
    }

    pub(super) async fn snapshot_for(
        &self,
        date: NaiveDate,
        slot: NaiveTime,
        exclude: Option<&Ulid>,
    ) -> AvailabilitySnapshot {
        let layout = &self.venue.layout;
        match self.get_day(date) {
            Some(day) => {
                let day = day.read().await;
                let open = self.slot_open(Some(&*day), date, slot);
                availability::snapshot(layout, day.slot(slot), open, exclude)
            }
            None => availability::snapshot(layout, None, self.slot_open(None, date, slot), exclude),
        }
    }

    /// Per-table view of one slot, as the planner sees it.
    pub async fn availability_snapshot(&self, date: NaiveDate, slot: NaiveTime) -> AvailabilitySnapshot {
        self.snapshot_for(date, slot, None).await
    }

    pub async fn check_availability(&self, date: NaiveDate, slot: NaiveTime) -> SlotAvailability {
        let snapshot = self.snapshot_for(date, slot, None).await;
        SlotAvailability {
            open: snapshot.open,
            remaining_total: snapshot.remaining_total(),
            remaining_by_floor: snapshot.floor_totals(),
        }
    }

    /// Which floors could seat `pax` on their own. Every floor is `false` on
    /// a closed day.
    pub async fn get_available_floors(
        &self,
        date: NaiveDate,
        slot: NaiveTime,
        pax: u32,
    ) -> BTreeMap<Floor, bool> {
        let snapshot = self.snapshot_for(date, slot, None).await;
        availability::available_floors(&snapshot, pax)
    }

    /// Any status. Cancelled reservations stay visible until purged.
    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        // A concurrent modify may move the entry between the index lookup and
        // the day read; one re-read settles it.
        for _ in 0..2 {
            let date = *self.index.get(&id)?.value();
            let day = self.get_day(date)?;
            let found = day.read().await.find(&id).cloned();
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// A guest's reservations, ordered by sitting time. Without
    /// `include_past` only upcoming confirmed ones are returned.
    pub async fn reservations_for_guest(&self, guest_id: &str, include_past: bool) -> Vec<Reservation> {
        self.collect_reservations(include_past, |r| {
            r.guest.as_ref().is_some_and(|g| g.guest_id == guest_id)
        })
        .await
    }

    pub async fn list_reservations(&self, include_past: bool) -> Vec<Reservation> {
        self.collect_reservations(include_past, |_| true).await
    }

    async fn collect_reservations(
        &self,
        include_past: bool,
        keep: impl Fn(&Reservation) -> bool,
    ) -> Vec<Reservation> {
        let now = now_local();
        let mut out = Vec::new();
        for day in self.all_days() {
            let day = day.read().await;
            out.extend(
                day.slots
                    .values()
                    .flat_map(|s| s.reservations.iter())
                    .filter(|r| include_past || (r.is_active() && !is_past(r.date, r.slot, now)))
                    .filter(|r| keep(r))
                    .cloned(),
            );
        }
        out.sort_by(|a, b| (a.date, a.slot, a.created_at).cmp(&(b.date, b.slot, b.created_at)));
        out
    }

    pub async fn list_closures(&self) -> Vec<Closure> {
        let mut closures = Vec::new();
        for day in self.all_days() {
            if let Some(closure) = &day.read().await.closure {
                closures.push(closure.clone());
            }
        }
        closures
    }

    /// Admin seating map: every table with the parties sat at it and a
    /// chair-by-chair assignment in booking order.
    pub async fn seating_map(&self, date: NaiveDate, slot: NaiveTime) -> Vec<TableOccupancy> {
        let day = match self.get_day(date) {
            Some(day) => Some(day.read_owned().await),
            None => None,
        };
        let ledger = day.as_deref().and_then(|d| d.slot(slot));

        self.venue
            .layout
            .tables()
            .iter()
            .map(|table| {
                let parties: Vec<SeatedParty> = ledger
                    .into_iter()
                    .flat_map(|s| s.active())
                    .filter_map(|r| {
                        let seats = r.seats_at(&table.id);
                        (seats > 0).then(|| SeatedParty {
                            reservation_id: r.id,
                            guest_name: r.guest.as_ref().map(|g| g.name.clone()),
                            seats,
                        })
                    })
                    .collect();
                let mut seat_map: Vec<Option<Ulid>> = parties
                    .iter()
                    .flat_map(|p| std::iter::repeat_n(Some(p.reservation_id), p.seats as usize))
                    .take(table.capacity as usize)
                    .collect();
                seat_map.resize(table.capacity as usize, None);
                TableOccupancy {
                    table_id: table.id.clone(),
                    floor: table.floor,
                    capacity: table.capacity,
                    shared: table.shared,
                    booked: parties.iter().map(|p| p.seats).sum(),
                    parties,
                    seat_map,
                }
            })
            .collect()
    }
}
