use std::collections::HashMap;

use crate::config::ConfigError;
use crate::limits::{MAX_TABLES, MAX_TABLE_CAPACITY};
use crate::model::{Floor, Table, TableId};

/// Immutable catalog of the venue's tables. Built once at startup and shared
/// behind an `Arc`; never locked.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Sorted by table id.
    tables: Vec<Table>,
    index: HashMap<TableId, usize>,
    /// Distinct floors, ascending.
    floors: Vec<Floor>,
}

impl Layout {
    pub fn new(mut tables: Vec<Table>) -> Result<Self, ConfigError> {
        if tables.is_empty() {
            return Err(ConfigError::Invalid("layout has no tables".into()));
        }
        if tables.len() > MAX_TABLES {
            return Err(ConfigError::Invalid("too many tables".into()));
        }
        tables.sort_by(|a, b| a.id.cmp(&b.id));

        let mut index = HashMap::with_capacity(tables.len());
        for (i, table) in tables.iter().enumerate() {
            if table.capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "table {} has zero capacity",
                    table.id
                )));
            }
            if table.capacity > MAX_TABLE_CAPACITY {
                return Err(ConfigError::Invalid(format!(
                    "table {} capacity {} exceeds {MAX_TABLE_CAPACITY}",
                    table.id, table.capacity
                )));
            }
            if index.insert(table.id.clone(), i).is_some() {
                return Err(ConfigError::Invalid(format!("duplicate table {}", table.id)));
            }
        }

        let mut floors: Vec<Floor> = tables.iter().map(|t| t.floor).collect();
        floors.sort();
        floors.dedup();

        Ok(Self {
            tables,
            index,
            floors,
        })
    }

    /// The two-floor café layout: bar seats, four-tops and one shared
    /// six-seat communal table per floor. 40 seats in total.
    pub fn default_venue() -> Self {
        let t = |id: &str, floor: u8, capacity: u32, shared: bool| Table {
            id: id.into(),
            floor: Floor(floor),
            capacity,
            shared,
        };
        let tables = vec![
            t("2F-A1", 2, 1, false),
            t("2F-A2", 2, 1, false),
            t("2F-A3", 2, 1, false),
            t("2F-A4", 2, 1, false),
            t("2F-B1", 2, 6, true),
            t("2F-C1", 2, 4, false),
            t("2F-D1", 2, 4, false),
            t("3F-E1", 3, 1, false),
            t("3F-E2", 3, 1, false),
            t("3F-E3", 3, 1, false),
            t("3F-E4", 3, 1, false),
            t("3F-F1", 3, 6, true),
            t("3F-G1", 3, 4, false),
            t("3F-H1", 3, 4, false),
            t("3F-I1", 3, 4, false),
        ];
        match Self::new(tables) {
            Ok(layout) => layout,
            Err(e) => unreachable!("built-in layout is valid: {e}"),
        }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn get(&self, id: &TableId) -> Option<&Table> {
        self.index.get(id).map(|&i| &self.tables[i])
    }

    pub fn floors(&self) -> &[Floor] {
        &self.floors
    }

    pub fn has_floor(&self, floor: Floor) -> bool {
        self.floors.binary_search(&floor).is_ok()
    }

    pub fn on_floor(&self, floor: Floor) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter(move |t| t.floor == floor)
    }

    pub fn total_capacity(&self) -> u32 {
        self.tables.iter().map(|t| t.capacity).sum()
    }
}
