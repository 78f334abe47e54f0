use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::TableId;

#[derive(Debug)]
pub enum EngineError {
    /// Commit-time re-validation failed: someone took the seats first.
    SeatConflict(TableId),
    /// The reservation moved or was cancelled between snapshot and commit.
    Stale(Ulid),
    DayClosed(NaiveDate),
    AlreadyClosed(NaiveDate),
    NotClosed(NaiveDate),
    HasReservations {
        date: NaiveDate,
        active: usize,
    },
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Conflicts are resolved by re-reading and re-planning.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::SeatConflict(_) | EngineError::Stale(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SeatConflict(table) => {
                write!(f, "seats at {table} taken by a concurrent booking")
            }
            EngineError::Stale(id) => write!(f, "reservation {id} changed concurrently"),
            EngineError::DayClosed(date) => write!(f, "{date} is closed"),
            EngineError::AlreadyClosed(date) => write!(f, "{date} is already closed"),
            EngineError::NotClosed(date) => write!(f, "{date} has no closure"),
            EngineError::HasReservations { date, active } => {
                write!(f, "cannot close {date}: {active} confirmed reservations")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
