use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::layout::Layout;
use crate::model::Table;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config io error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
            ConfigError::Invalid(e) => write!(f, "invalid config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Unparseable values fall back to the default, like a missing one.
fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.parse().ok())
}

/// Process settings, read from `SEATKEEP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// JSON venue file; the built-in venue is used when unset.
    pub venue_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind: get("SEATKEEP_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&get, "SEATKEEP_PORT").unwrap_or(7878),
            data_dir: get("SEATKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            max_connections: parsed(&get, "SEATKEEP_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&get, "SEATKEEP_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&get, "SEATKEEP_METRICS_PORT"),
            venue_path: get("SEATKEEP_VENUE").map(PathBuf::from),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("ledger.wal")
    }

    pub fn load_venue(&self) -> Result<Venue, ConfigError> {
        match &self.venue_path {
            Some(path) => Venue::from_file(path),
            None => Ok(Venue::default()),
        }
    }
}

/// Opening hours for one weekday. Last seating is strictly before `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    #[serde(default)]
    pub closed: bool,
}

/// Weekly schedule. A weekday missing from the map is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessHours(pub HashMap<Weekday, DayHours>);

impl Default for BusinessHours {
    fn default() -> Self {
        let hours = |open: u32, close: u32| DayHours {
            open: NaiveTime::from_hms_opt(open, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(close, 0, 0).unwrap_or(NaiveTime::MIN),
            closed: false,
        };
        let mut days = HashMap::new();
        for wd in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            days.insert(wd, hours(9, 18));
        }
        days.insert(Weekday::Sat, hours(10, 20));
        days.insert(Weekday::Sun, hours(10, 20));
        Self(days)
    }
}

impl BusinessHours {
    /// Every day of the week, `open..close`.
    pub fn every_day(open: NaiveTime, close: NaiveTime) -> Self {
        let mut days = HashMap::new();
        for wd in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            days.insert(wd, DayHours { open, close, closed: false });
        }
        Self(days)
    }

    pub fn for_day(&self, weekday: Weekday) -> Option<&DayHours> {
        self.0.get(&weekday).filter(|h| !h.closed)
    }

    pub fn is_open_on(&self, date: NaiveDate) -> bool {
        self.for_day(date.weekday()).is_some()
    }

    pub fn admits(&self, date: NaiveDate, slot: NaiveTime) -> bool {
        self.for_day(date.weekday())
            .is_some_and(|h| h.open <= slot && slot < h.close)
    }
}

/// On-disk venue description.
#[derive(Debug, Clone, Deserialize)]
struct VenueFile {
    tables: Vec<Table>,
    #[serde(default)]
    hours: Option<BusinessHours>,
    #[serde(default = "default_slot_minutes")]
    slot_minutes: u32,
}

fn default_slot_minutes() -> u32 {
    30
}

/// Layout plus the schedule rules that gate a booking before any ledger read.
#[derive(Debug, Clone)]
pub struct Venue {
    pub layout: Layout,
    pub hours: BusinessHours,
    /// Slots start on multiples of this many minutes past midnight.
    pub slot_minutes: u32,
}

impl Default for Venue {
    fn default() -> Self {
        Self {
            layout: Layout::default_venue(),
            hours: BusinessHours::default(),
            slot_minutes: default_slot_minutes(),
        }
    }
}

impl Venue {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file: VenueFile =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if file.slot_minutes == 0 || 24 * 60 % file.slot_minutes != 0 {
            return Err(ConfigError::Invalid(format!(
                "slot_minutes {} does not divide a day",
                file.slot_minutes
            )));
        }
        Ok(Self {
            layout: Layout::new(file.tables)?,
            hours: file.hours.unwrap_or_default(),
            slot_minutes: file.slot_minutes,
        })
    }

    pub fn slot_aligned(&self, slot: NaiveTime) -> bool {
        let minutes = slot.hour() * 60 + slot.minute();
        slot.second() == 0 && slot.nanosecond() == 0 && minutes % self.slot_minutes == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Floor;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn env_defaults() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg.port, 7878);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/ledger.wal"));
    }

    #[test]
    fn env_overrides_and_bad_numbers() {
        let cfg = Config::from_lookup(|key| match key {
            "SEATKEEP_PORT" => Some("9000".into()),
            "SEATKEEP_METRICS_PORT" => Some("9100".into()),
            "SEATKEEP_MAX_CONNECTIONS" => Some("lots".into()),
            "SEATKEEP_COMPACT_THRESHOLD" => Some("50".into()),
            "SEATKEEP_VENUE" => Some("/etc/venue.json".into()),
            _ => None,
        });
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.venue_path, Some(PathBuf::from("/etc/venue.json")));
    }

    #[test]
    fn default_hours() {
        let hours = BusinessHours::default();
        // 2099-01-05 is a Monday.
        let monday = NaiveDate::from_ymd_opt(2099, 1, 5).unwrap();
        assert_eq!(monday.weekday(), Weekday::Mon);
        assert!(hours.admits(monday, t(9, 0)));
        assert!(hours.admits(monday, t(17, 30)));
        assert!(!hours.admits(monday, t(18, 0)));
        assert!(!hours.admits(monday, t(8, 30)));
        let saturday = NaiveDate::from_ymd_opt(2099, 1, 10).unwrap();
        assert!(hours.admits(saturday, t(19, 30)));
    }

    #[test]
    fn venue_from_json() {
        let raw = r#"{
            "tables": [
                {"id": "1F-X1", "floor": 1, "capacity": 2},
                {"id": "1F-X2", "floor": 1, "capacity": 8, "shared": true}
            ],
            "hours": {
                "Monday": {"open": "11:00", "close": "22:00"},
                "Tuesday": {"open": "11:00", "close": "22:00", "closed": true}
            },
            "slot_minutes": 15
        }"#;
        let venue = Venue::from_json(raw).unwrap();
        assert_eq!(venue.layout.floors(), &[Floor(1)]);
        assert!(venue.layout.get(&"1F-X2".into()).unwrap().shared);
        assert!(venue.hours.for_day(Weekday::Mon).is_some());
        assert!(venue.hours.for_day(Weekday::Tue).is_none());
        assert!(venue.hours.for_day(Weekday::Wed).is_none());
        assert!(venue.slot_aligned(t(11, 45)));
        assert!(!venue.slot_aligned(t(11, 50)));
    }

    #[test]
    fn venue_rejects_bad_slot_minutes() {
        let raw = r#"{"tables": [{"id": "a", "floor": 1, "capacity": 2}], "slot_minutes": 7}"#;
        assert!(matches!(Venue::from_json(raw), Err(ConfigError::Invalid(_))));
        assert!(matches!(Venue::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
