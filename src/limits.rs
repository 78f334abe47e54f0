//! Hard limits and tuning constants for the engine and the front door.

/// Largest party a single request may ask for.
pub const MAX_PAX: u32 = 200;

/// Max length of guest id / name / phone fields.
pub const MAX_GUEST_FIELD_LEN: usize = 256;

/// Max length of a closure reason.
pub const MAX_CLOSURE_REASON_LEN: usize = 512;

/// Same-floor combination search is exhaustive up to this many candidate
/// tables; wider floors fall back to a largest-first fill.
pub const MAX_COMBINATION_TABLES: usize = 16;

/// Attempts per booking call (snapshot → plan → commit) before giving up
/// with `retry_exhausted`.
pub const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// First backoff after a commit conflict; doubles per attempt.
pub const COMMIT_BACKOFF_BASE_MS: u64 = 5;

/// Backoff ceiling.
pub const COMMIT_BACKOFF_MAX_MS: u64 = 200;

/// Max reservations held by one (date, slot) partition.
pub const MAX_RESERVATIONS_PER_SLOT: usize = 10_000;

/// Max bytes in one JSON request line.
pub const MAX_REQUEST_LINE_LEN: usize = 64 * 1024;

/// Max tables in a venue layout.
pub const MAX_TABLES: usize = 1_000;

/// Max seats at one table. With `MAX_TABLES` this bounds venue-wide seat
/// sums well inside `u32`.
pub const MAX_TABLE_CAPACITY: u32 = 1_000;
