use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use seatkeep::config::{BusinessHours, Venue};
use seatkeep::engine::Engine;
use seatkeep::layout::Layout;
use seatkeep::model::{BookOutcome, BookingRequest, FailureKind};

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Tiny deterministic generator so runs are comparable.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn open_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("seatkeep_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let venue = Venue {
        layout: Layout::default_venue(),
        hours: BusinessHours::every_day(time(10, 0), time(22, 0)),
        slot_minutes: 30,
    };
    Arc::new(Engine::new(dir.join(name), Arc::new(venue)).expect("open engine"))
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

fn date(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2099, 1, 1)
        .and_then(|d| d.checked_add_days(chrono::Days::new(offset)))
        .unwrap_or(NaiveDate::MAX)
}

fn random_request(rng: &mut Lcg, days: u64) -> BookingRequest {
    let pax = 1 + (rng.next() % 8) as u32;
    let slot = time(10 + (rng.next() % 12) as u32, if rng.next() % 2 == 0 { 0 } else { 30 });
    BookingRequest::new(pax, date(rng.next() % days), slot).allow_split(rng.next() % 4 == 0)
}

async fn phase1_sequential(engine: &Engine) {
    let mut rng = Lcg(7);
    let mut latencies = Vec::with_capacity(2000);
    let mut confirmed = 0;
    let start = Instant::now();
    for _ in 0..2000 {
        let request = random_request(&mut rng, 30);
        let t = Instant::now();
        if engine.book(&request).await.is_confirmed() {
            confirmed += 1;
        }
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    println!(
        "  {} bookings in {:.2}s ({:.0}/s), {confirmed} confirmed",
        latencies.len(),
        elapsed.as_secs_f64(),
        latencies.len() as f64 / elapsed.as_secs_f64()
    );
    print_latency("book", &mut latencies);
}

/// Every task fights over one slot, so most commits conflict and retry.
async fn phase2_contended(engine: Arc<Engine>) {
    let slot_date = date(400);
    let mut handles = Vec::new();
    let start = Instant::now();
    for task in 0..64u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut rng = Lcg(task + 1);
            let pax = 1 + (rng.next() % 3) as u32;
            let request = BookingRequest::new(pax, slot_date, time(19, 0)).allow_split(true);
            let t = Instant::now();
            let outcome = engine.book(&request).await;
            (pax, outcome, t.elapsed())
        }));
    }

    let mut latencies = Vec::new();
    let (mut seated, mut exhausted, mut full) = (0u32, 0, 0);
    for h in handles {
        let Ok((pax, outcome, latency)) = h.await else { continue };
        latencies.push(latency);
        match outcome {
            BookOutcome::Confirmed { .. } => seated += pax,
            BookOutcome::Failure { kind: FailureKind::RetryExhausted } => exhausted += 1,
            _ => full += 1,
        }
    }
    println!(
        "  64 racers in {:.2}ms: {seated} seats taken, {full} turned away, {exhausted} retry_exhausted",
        start.elapsed().as_secs_f64() * 1000.0
    );

    let booked: u32 = engine
        .seating_map(slot_date, time(19, 0))
        .await
        .iter()
        .map(|t| t.booked)
        .sum();
    let overbooked = engine
        .seating_map(slot_date, time(19, 0))
        .await
        .iter()
        .any(|t| t.booked > t.capacity || (!t.shared && t.parties.len() > 1));
    println!("  ledger: {booked} seats booked, invariants {}", if overbooked { "VIOLATED" } else { "hold" });
    print_latency("contended book", &mut latencies);
}

async fn phase3_read_under_load(engine: Arc<Engine>) {
    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut rng = Lcg(99);
            for _ in 0..1000 {
                let request = random_request(&mut rng, 7);
                engine.book(&request).await;
            }
        })
    };

    let mut latencies = Vec::with_capacity(5000);
    let mut rng = Lcg(3);
    for _ in 0..5000 {
        let slot = time(10 + (rng.next() % 12) as u32, 0);
        let t = Instant::now();
        engine.check_availability(date(rng.next() % 7), slot).await;
        latencies.push(t.elapsed());
    }
    let _ = writer.await;
    print_latency("check_availability", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== seatkeep stress benchmark ===\n");

    println!("[phase 1] sequential booking throughput");
    let engine = open_engine("phase1.wal");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] contended slot");
    phase2_contended(engine.clone()).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(open_engine("phase3.wal")).await;

    println!("\n[phase 4] compaction");
    let appends = engine.wal_appends_since_compact().await;
    let t = Instant::now();
    match engine.compact_wal().await {
        Ok(()) => println!(
            "  compacted {appends} appends in {:.2}ms",
            t.elapsed().as_secs_f64() * 1000.0
        ),
        Err(e) => println!("  compaction failed: {e}"),
    }

    println!("\n=== benchmark complete ===");
}
