use crate::limits::MAX_COMBINATION_TABLES;
use crate::model::*;

use super::availability::{feasible_floors, AvailabilitySnapshot, TableAvailability};

// ── Allocation Planner ───────────────────────────────────────────
//
// Pure: the same request against the same snapshot always yields the same
// decision. Every tie is broken on table id, then floor number.

/// Which stage produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SingleTable,
    MultiTable,
    CrossFloor,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SingleTable => "single_table",
            Stage::MultiTable => "multi_table",
            Stage::CrossFloor => "cross_floor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Fill order: the table taking the most seats comes first.
    pub seating: Vec<Seating>,
    pub stage: Stage,
}

impl Plan {
    pub fn seats(&self) -> u32 {
        self.seating.iter().map(|s| s.seats).sum()
    }

    pub fn spans_floors(&self) -> bool {
        self.seating
            .windows(2)
            .any(|w| w[0].floor != w[1].floor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Plan(Plan),
    Negotiate(NegotiationSignal, NegotiationContext),
    Fail(FailureKind),
}

pub fn plan(request: &BookingRequest, snapshot: &AvailabilitySnapshot) -> Decision {
    let pax = request.pax;
    if !snapshot.open {
        return Decision::Fail(FailureKind::ClosedDay);
    }
    if pax == 0 {
        return Decision::Fail(FailureKind::InvalidRequest);
    }

    match request.floor_preference {
        Some(preferred) => {
            // Preferred floor first at every stage before looking elsewhere.
            if let Some(table) = best_single(snapshot.on_floor(preferred), pax) {
                return Decision::Plan(single(table, pax));
            }
            if let Some(combination) = best_combination(snapshot, preferred, pax) {
                return Decision::Plan(combination.plan);
            }
            let elsewhere = feasible_floors(snapshot, pax);
            if !elsewhere.is_empty() {
                return negotiate(NegotiationSignal::FloorFull, request, snapshot, elsewhere);
            }
        }
        None => {
            if let Some(table) = best_single(snapshot.tables.iter(), pax) {
                return Decision::Plan(single(table, pax));
            }
            let best = snapshot
                .floors
                .iter()
                .filter_map(|&f| best_combination(snapshot, f, pax))
                .min_by(|a, b| a.key().cmp(&b.key()));
            if let Some(combination) = best {
                return Decision::Plan(combination.plan);
            }
        }
    }

    // No single floor can seat the party.
    if snapshot.remaining_total() < pax {
        return Decision::Fail(FailureKind::CapacityExceeded);
    }
    if !request.allow_split {
        return negotiate(NegotiationSignal::SplitFloorRequired, request, snapshot, Vec::new());
    }
    match cross_floor(snapshot, pax) {
        Some(plan) => Decision::Plan(plan),
        None => Decision::Fail(FailureKind::CapacityExceeded),
    }
}

fn negotiate(
    signal: NegotiationSignal,
    request: &BookingRequest,
    snapshot: &AvailabilitySnapshot,
    feasible_floors: Vec<Floor>,
) -> Decision {
    Decision::Negotiate(
        signal,
        NegotiationContext {
            pax: request.pax,
            requested_floor: request.floor_preference,
            feasible_floors,
            remaining_total: snapshot.remaining_total(),
        },
    )
}

fn single(table: &TableAvailability, pax: u32) -> Plan {
    Plan {
        seating: vec![Seating {
            table_id: table.id.clone(),
            floor: table.floor,
            seats: pax,
        }],
        stage: Stage::SingleTable,
    }
}

/// Stage 1: smallest remaining capacity that still fits. Candidates arrive in
/// table-id order, so keeping the first minimum breaks ties on lowest id.
fn best_single<'a>(
    candidates: impl Iterator<Item = &'a TableAvailability>,
    pax: u32,
) -> Option<&'a TableAvailability> {
    let mut best: Option<&TableAvailability> = None;
    for table in candidates.filter(|t| t.remaining >= pax) {
        if best.is_none_or(|b| table.remaining < b.remaining) {
            best = Some(table);
            if table.remaining == pax {
                break;
            }
        }
    }
    best
}

/// A same-floor plan plus the empty chairs it leaves on its tables.
struct Combination {
    floor: Floor,
    waste: u32,
    plan: Plan,
}

impl Combination {
    /// Cross-floor ordering: least waste, fewest tables, lowest ids, lowest floor.
    fn key(&self) -> (u32, usize, Vec<&TableId>, Floor) {
        let mut ids: Vec<&TableId> = self.plan.seating.iter().map(|s| &s.table_id).collect();
        ids.sort();
        (self.waste, self.plan.seating.len(), ids, self.floor)
    }
}

/// Stage 3: same-floor subset with the least wasted seats; ties go to fewer
/// tables, then the lexicographically lowest id list. Floors wider than
/// `MAX_COMBINATION_TABLES` candidates fall back to a largest-first fill.
fn best_combination(snapshot: &AvailabilitySnapshot, floor: Floor, pax: u32) -> Option<Combination> {
    let candidates: Vec<&TableAvailability> =
        snapshot.on_floor(floor).filter(|t| t.remaining > 0).collect();
    let total: u32 = candidates.iter().map(|t| t.remaining).sum();
    if total < pax {
        return None;
    }

    let chosen: Vec<&TableAvailability> = if candidates.len() > MAX_COMBINATION_TABLES {
        candidates
    } else {
        let n = candidates.len();
        // (waste, table count, chosen indices); candidates are in id order.
        let mut best: Option<(u32, usize, Vec<usize>)> = None;
        for mask in 1u32..(1u32 << n) {
            let picked: Vec<usize> = (0..n).filter(|i| mask & (1 << i) != 0).collect();
            let sum: u32 = picked.iter().map(|&i| candidates[i].remaining).sum();
            if sum < pax {
                continue;
            }
            let key = (sum - pax, picked.len(), picked);
            if best.as_ref().is_none_or(|b| key < *b) {
                best = Some(key);
            }
        }
        let (_, _, picked) = best?;
        picked.into_iter().map(|i| candidates[i]).collect()
    };

    let plan = fill_largest_first(chosen, pax, Stage::MultiTable)?;
    let used: u32 = plan
        .seating
        .iter()
        .filter_map(|s| snapshot.get(&s.table_id))
        .map(|t| t.remaining)
        .sum();
    Some(Combination {
        floor,
        waste: used - pax,
        plan,
    })
}

/// Stage 4: across every floor, most remaining capacity first.
fn cross_floor(snapshot: &AvailabilitySnapshot, pax: u32) -> Option<Plan> {
    let candidates: Vec<&TableAvailability> =
        snapshot.tables.iter().filter(|t| t.remaining > 0).collect();
    fill_largest_first(candidates, pax, Stage::CrossFloor)
}

/// Seat `pax` over `tables`, biggest remaining capacity first (ties: lowest
/// id). Stops as soon as everyone is seated; `None` if they never are.
fn fill_largest_first(mut tables: Vec<&TableAvailability>, pax: u32, stage: Stage) -> Option<Plan> {
    tables.sort_by(|a, b| b.remaining.cmp(&a.remaining).then_with(|| a.id.cmp(&b.id)));
    let mut left = pax;
    let mut seating = Vec::new();
    for table in tables {
        if left == 0 {
            break;
        }
        let take = left.min(table.remaining);
        seating.push(Seating {
            table_id: table.id.clone(),
            floor: table.floor,
            seats: take,
        });
        left -= take;
    }
    (left == 0).then_some(Plan { seating, stage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::availability::snapshot;
    use crate::layout::Layout;
    use chrono::{NaiveDate, NaiveTime};

    fn request(pax: u32) -> BookingRequest {
        BookingRequest::new(
            pax,
            NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        )
    }

    fn table(id: &str, floor: u8, capacity: u32, shared: bool) -> Table {
        Table {
            id: id.into(),
            floor: Floor(floor),
            capacity,
            shared,
        }
    }

    /// Snapshot of `layout` with per-table seats already taken.
    fn snap_with(layout: &Layout, taken: &[(&str, u32)]) -> AvailabilitySnapshot {
        let mut snap = snapshot(layout, None, true, None);
        for (id, seats) in taken {
            let t = snap.tables.iter_mut().find(|t| t.id.as_str() == *id).unwrap();
            t.booked = *seats;
            t.remaining = if t.shared { t.capacity - seats } else { 0 };
        }
        snap
    }

    fn tables_of(decision: &Decision) -> Vec<(&str, u32)> {
        match decision {
            Decision::Plan(plan) => plan
                .seating
                .iter()
                .map(|s| (s.table_id.as_str(), s.seats))
                .collect(),
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn exact_fit_beats_larger_table() {
        let layout = Layout::default_venue();
        let snap = snap_with(&layout, &[]);
        assert_eq!(tables_of(&plan(&request(4), &snap)), vec![("2F-C1", 4)]);
        assert_eq!(tables_of(&plan(&request(1), &snap)), vec![("2F-A1", 1)]);
    }

    #[test]
    fn compactness_picks_smallest_remaining() {
        let layout = Layout::default_venue();
        // Every four-top is taken; two guests go to the shared six-seat table
        // that already has the fewest empty chairs.
        let snap = snap_with(
            &layout,
            &[
                ("2F-C1", 4),
                ("2F-D1", 4),
                ("3F-G1", 4),
                ("3F-H1", 4),
                ("3F-I1", 4),
                ("3F-F1", 1),
                ("2F-B1", 3),
            ],
        );
        assert_eq!(tables_of(&plan(&request(2), &snap)), vec![("2F-B1", 2)]);
    }

    #[test]
    fn empty_small_table_preferred_over_sharing() {
        let layout = Layout::default_venue();
        let snap = snap_with(&layout, &[("2F-B1", 2)]);
        let decision = plan(&request(1), &snap);
        assert_eq!(tables_of(&decision), vec![("2F-A1", 1)]);
    }

    #[test]
    fn preferred_floor_is_tried_first() {
        let layout = Layout::default_venue();
        let snap = snap_with(&layout, &[]);
        let decision = plan(&request(4).prefer_floor(Floor(3)), &snap);
        assert_eq!(tables_of(&decision), vec![("3F-G1", 4)]);
    }

    #[test]
    fn preferred_floor_full_negotiates() {
        let layout = Layout::new(vec![table("2F-X", 2, 4, false), table("3F-Y", 3, 6, false)]).unwrap();
        let snap = snap_with(&layout, &[("2F-X", 4)]);
        match plan(&request(4).prefer_floor(Floor(2)), &snap) {
            Decision::Negotiate(NegotiationSignal::FloorFull, ctx) => {
                assert_eq!(ctx.requested_floor, Some(Floor(2)));
                assert_eq!(ctx.feasible_floors, vec![Floor(3)]);
                assert_eq!(ctx.remaining_total, 6);
            }
            other => panic!("expected floor_full, got {other:?}"),
        }
        // Same state, guest accepts the other floor.
        assert_eq!(
            tables_of(&plan(&request(4).prefer_floor(Floor(3)), &snap)),
            vec![("3F-Y", 4)]
        );
    }

    #[test]
    fn preferred_floor_combination_beats_other_floor_single() {
        let layout = Layout::new(vec![
            table("2F-A", 2, 2, false),
            table("2F-B", 2, 2, false),
            table("3F-C", 3, 4, false),
        ])
        .unwrap();
        let snap = snap_with(&layout, &[]);
        let decision = plan(&request(4).prefer_floor(Floor(2)), &snap);
        assert_eq!(tables_of(&decision), vec![("2F-A", 2), ("2F-B", 2)]);
    }

    #[test]
    fn combination_minimizes_waste() {
        let layout = Layout::new(vec![
            table("a", 1, 6, false),
            table("b", 1, 4, false),
            table("c", 1, 3, false),
            table("d", 1, 2, false),
        ])
        .unwrap();
        let snap = snap_with(&layout, &[]);
        // 7 = 4 + 3 exactly; 6 + 2 would waste one.
        match plan(&request(7), &snap) {
            Decision::Plan(p) => {
                assert_eq!(p.stage, Stage::MultiTable);
                let ids: Vec<&str> = p.seating.iter().map(|s| s.table_id.as_str()).collect();
                assert_eq!(ids, vec!["b", "c"]);
                assert_eq!(p.seats(), 7);
            }
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn combination_prefers_fewer_tables_on_equal_waste() {
        let layout = Layout::new(vec![
            table("a", 1, 5, false),
            table("b", 1, 3, false),
            table("c", 1, 2, false),
            table("d", 1, 1, false),
        ])
        .unwrap();
        let snap = snap_with(&layout, &[]);
        // 8 = 5 + 3 (two tables) or 5 + 2 + 1 (three tables).
        assert_eq!(tables_of(&plan(&request(8), &snap)), vec![("a", 5), ("b", 3)]);
    }

    #[test]
    fn combination_stays_on_one_floor() {
        let layout = Layout::default_venue();
        let snap = snap_with(&layout, &[]);
        // 8 fits as 4 + 4 on either floor; 2F wins on lower table ids.
        let decision = plan(&request(8), &snap);
        assert_eq!(tables_of(&decision), vec![("2F-C1", 4), ("2F-D1", 4)]);
    }

    #[test]
    fn shared_table_contributes_only_empty_chairs() {
        let layout = Layout::new(vec![table("s", 1, 6, true), table("t", 1, 4, false)]).unwrap();
        let snap = snap_with(&layout, &[("s", 4)]);
        // 2 free at the shared table + 4 at t.
        assert_eq!(tables_of(&plan(&request(6), &snap)), vec![("t", 4), ("s", 2)]);
    }

    #[test]
    fn split_required_then_granted() {
        let layout = Layout::new(vec![
            table("2F-X", 2, 4, false),
            table("3F-Y", 3, 4, false),
        ])
        .unwrap();
        let snap = snap_with(&layout, &[]);
        match plan(&request(8), &snap) {
            Decision::Negotiate(NegotiationSignal::SplitFloorRequired, ctx) => {
                assert!(ctx.feasible_floors.is_empty());
                assert_eq!(ctx.remaining_total, 8);
            }
            other => panic!("expected split_floor_required, got {other:?}"),
        }
        match plan(&request(8).allow_split(true), &snap) {
            Decision::Plan(p) => {
                assert_eq!(p.stage, Stage::CrossFloor);
                assert!(p.spans_floors());
                assert_eq!(p.seats(), 8);
            }
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn cross_floor_takes_largest_first() {
        let layout = Layout::default_venue();
        let snap = snap_with(&layout, &[]);
        let decision = plan(&request(25).allow_split(true), &snap);
        let seating = tables_of(&decision);
        assert_eq!(seating[0], ("2F-B1", 6));
        assert_eq!(seating[1], ("3F-F1", 6));
        assert_eq!(seating.iter().map(|s| s.1).sum::<u32>(), 25);
    }

    #[test]
    fn venue_too_small_is_terminal() {
        let layout = Layout::default_venue();
        let snap = snap_with(&layout, &[]);
        assert_eq!(plan(&request(41), &snap), Decision::Fail(FailureKind::CapacityExceeded));
        assert_eq!(
            plan(&request(41).allow_split(true), &snap),
            Decision::Fail(FailureKind::CapacityExceeded)
        );
    }

    #[test]
    fn closed_snapshot_fails() {
        let layout = Layout::default_venue();
        let snap = snapshot(&layout, None, false, None);
        assert_eq!(plan(&request(2), &snap), Decision::Fail(FailureKind::ClosedDay));
    }

    #[test]
    fn deterministic() {
        let layout = Layout::default_venue();
        let snap = snap_with(&layout, &[("2F-C1", 4), ("3F-F1", 2)]);
        for pax in 1..=30 {
            let req = request(pax).allow_split(true);
            assert_eq!(plan(&req, &snap), plan(&req, &snap.clone()));
        }
    }
}
