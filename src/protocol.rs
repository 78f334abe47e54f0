//! JSON-lines request/response shapes for the TCP front door.
//!
//! One request object per line, tagged by `op`; one response object per
//! line, tagged by `kind`.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CheckAvailability {
        date: NaiveDate,
        slot: NaiveTime,
    },
    AvailableFloors {
        date: NaiveDate,
        slot: NaiveTime,
        pax: u32,
    },
    Book {
        pax: u32,
        date: NaiveDate,
        slot: NaiveTime,
        #[serde(default)]
        floor_preference: Option<Floor>,
        #[serde(default)]
        allow_split: bool,
        #[serde(default)]
        guest: Option<Guest>,
    },
    Cancel {
        reservation_id: Ulid,
    },
    Modify {
        reservation_id: Ulid,
        #[serde(default)]
        pax: Option<u32>,
        #[serde(default)]
        date: Option<NaiveDate>,
        #[serde(default)]
        slot: Option<NaiveTime>,
        #[serde(default)]
        floor_preference: Option<Floor>,
        #[serde(default)]
        allow_split: bool,
    },
    GetReservation {
        reservation_id: Ulid,
    },
    GuestReservations {
        guest_id: String,
        #[serde(default)]
        include_past: bool,
    },
    ListReservations {
        #[serde(default)]
        include_past: bool,
    },
    SeatingMap {
        date: NaiveDate,
        slot: NaiveTime,
    },
    AddClosure {
        date: NaiveDate,
        #[serde(default)]
        reason: Option<String>,
    },
    RemoveClosure {
        date: NaiveDate,
    },
    ListClosures,
    PurgeBefore {
        date: NaiveDate,
    },
}

impl Command {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Command::CheckAvailability { .. } => "check_availability",
            Command::AvailableFloors { .. } => "available_floors",
            Command::Book { .. } => "book",
            Command::Cancel { .. } => "cancel",
            Command::Modify { .. } => "modify",
            Command::GetReservation { .. } => "get_reservation",
            Command::GuestReservations { .. } => "guest_reservations",
            Command::ListReservations { .. } => "list_reservations",
            Command::SeatingMap { .. } => "seating_map",
            Command::AddClosure { .. } => "add_closure",
            Command::RemoveClosure { .. } => "remove_closure",
            Command::ListClosures => "list_closures",
            Command::PurgeBefore { .. } => "purge_before",
        }
    }
}

pub fn parse(line: &str) -> Result<Command, String> {
    serde_json::from_str(line.trim()).map_err(|e| format!("bad request: {e}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Availability {
        #[serde(flatten)]
        availability: SlotAvailability,
    },
    Floors {
        floors: BTreeMap<Floor, bool>,
    },
    Booking {
        outcome: BookOutcome,
    },
    Cancel {
        outcome: CancelOutcome,
    },
    Reservation {
        reservation: Option<Reservation>,
    },
    Reservations {
        reservations: Vec<Reservation>,
    },
    SeatingMap {
        tables: Vec<TableOccupancy>,
    },
    Closures {
        closures: Vec<Closure>,
    },
    Purged {
        reservations: usize,
    },
    Ok,
    Error {
        message: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"kind":"error","message":"encode failed: {e}"}}"#))
    }
}
