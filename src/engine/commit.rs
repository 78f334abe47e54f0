use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::layout::Layout;
use crate::model::*;

use super::availability::occupancy;
use super::EngineError;

pub(crate) fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub(crate) fn is_past(date: NaiveDate, slot: NaiveTime, now: NaiveDateTime) -> bool {
    date.and_time(slot) <= now
}

/// Re-check a plan against the ledger as it is *now*, under the day's write
/// lock. The snapshot the plan was built from may be stale.
///
/// Rejects when any table would exceed its capacity or when a non-shared
/// table already seats another party. `exclude` is the reservation being
/// replaced by a modification.
pub(crate) fn validate_seating(
    layout: &Layout,
    slot: Option<&SlotLedger>,
    seating: &[Seating],
    exclude: Option<&Ulid>,
) -> Result<(), EngineError> {
    if seating.is_empty() {
        return Err(EngineError::InvalidInput("empty seating"));
    }
    for (i, seat) in seating.iter().enumerate() {
        if seat.seats == 0 {
            return Err(EngineError::InvalidInput("zero seats at a table"));
        }
        if seating[..i].iter().any(|s| s.table_id == seat.table_id) {
            return Err(EngineError::InvalidInput("table listed twice"));
        }
        let table = layout
            .get(&seat.table_id)
            .ok_or(EngineError::InvalidInput("table not in layout"))?;
        let (booked, parties) = occupancy(slot, &table.id, exclude);
        if !table.shared && parties > 0 {
            return Err(EngineError::SeatConflict(table.id.clone()));
        }
        if booked + seat.seats > table.capacity {
            return Err(EngineError::SeatConflict(table.id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(id: &str, floor: u8, seats: u32) -> Seating {
        Seating {
            table_id: id.into(),
            floor: Floor(floor),
            seats,
        }
    }

    fn slot_with(seating: Vec<Seating>) -> (SlotLedger, Ulid) {
        let mut slot = SlotLedger::default();
        let id = Ulid::new();
        slot.insert(Reservation {
            id,
            date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
            slot: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            pax: seating.iter().map(|s| s.seats).sum(),
            status: ReservationStatus::Confirmed,
            seating,
            split_floor: false,
            guest: None,
            created_at: now_local(),
            updated_at: None,
        });
        (slot, id)
    }

    #[test]
    fn past_is_inclusive_of_now() {
        let now = NaiveDate::from_ymd_opt(2030, 5, 1)
            .unwrap()
            .and_hms_opt(19, 0, 0)
            .unwrap();
        let d = now.date();
        assert!(is_past(d, NaiveTime::from_hms_opt(19, 0, 0).unwrap(), now));
        assert!(!is_past(d, NaiveTime::from_hms_opt(19, 30, 0).unwrap(), now));
    }

    #[test]
    fn accepts_free_tables() {
        let layout = Layout::default_venue();
        assert!(validate_seating(&layout, None, &[seat("2F-C1", 2, 4)], None).is_ok());
    }

    #[test]
    fn rejects_second_party_at_private_table() {
        let layout = Layout::default_venue();
        let (slot, _) = slot_with(vec![seat("2F-C1", 2, 1)]);
        let err = validate_seating(&layout, Some(&slot), &[seat("2F-C1", 2, 1)], None).unwrap_err();
        assert!(matches!(err, EngineError::SeatConflict(t) if t.as_str() == "2F-C1"));
    }

    #[test]
    fn shared_table_bounded_by_capacity() {
        let layout = Layout::default_venue();
        let (slot, _) = slot_with(vec![seat("2F-B1", 2, 4)]);
        assert!(validate_seating(&layout, Some(&slot), &[seat("2F-B1", 2, 2)], None).is_ok());
        assert!(matches!(
            validate_seating(&layout, Some(&slot), &[seat("2F-B1", 2, 3)], None),
            Err(EngineError::SeatConflict(_))
        ));
    }

    #[test]
    fn excluded_reservation_frees_its_seats() {
        let layout = Layout::default_venue();
        let (slot, own) = slot_with(vec![seat("3F-G1", 3, 4)]);
        assert!(validate_seating(&layout, Some(&slot), &[seat("3F-G1", 3, 3)], Some(&own)).is_ok());
    }

    #[test]
    fn rejects_malformed_seating() {
        let layout = Layout::default_venue();
        assert!(matches!(
            validate_seating(&layout, None, &[], None),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_seating(&layout, None, &[seat("9F-Z9", 9, 1)], None),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_seating(&layout, None, &[seat("2F-B1", 2, 1), seat("2F-B1", 2, 1)], None),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
