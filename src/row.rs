//! Row records handed to consumers.
//!
//! Each decoded row is a list of `(column, Cell)` pairs in wire order. Column
//! kinds are decided once, from the first row, and never revised.

use crate::config::TimeColumn;
use crate::timeparse::parse_timestamp;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A row as it arrives on the wire: column name to JSON value.
pub type RawRow = serde_json::Map<String, Value>;

/// One typed value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// Nested object or array, kept verbatim
    Json(Value),
}

impl Cell {
    /// Converts a wire value without any time interpretation.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Cell::UInt(u)
                } else {
                    // serde_json numbers are always one of the three
                    Cell::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Cell::Text(s),
            other => Cell::Json(other),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            Cell::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(f) => Some(*f),
            Cell::Int(i) => Some(*i as f64),
            Cell::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Cell::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// The column kind this value implies. `Null` falls back to `Text`.
    pub fn kind(&self) -> ValueKind {
        match self {
            Cell::Int(_) => ValueKind::Integer {
                width: 64,
                signed: true,
            },
            Cell::UInt(_) => ValueKind::Integer {
                width: 64,
                signed: false,
            },
            Cell::Float(_) => ValueKind::Float { width: 64 },
            Cell::Bool(_) => ValueKind::Bool,
            Cell::Timestamp(_) => ValueKind::Timestamp,
            Cell::Json(_) => ValueKind::RawJson,
            Cell::Text(_) | Cell::Null => ValueKind::Text,
        }
    }
}

/// Column representation for the materialization layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueKind {
    Integer { width: u8, signed: bool },
    Float { width: u8 },
    Text,
    Bool,
    Timestamp,
    RawJson,
    /// Dictionary-encoded values. JSON never implies this kind; a
    /// materialization layer that knows a column is an enum assigns it.
    EnumIndex,
}

/// A named, classified column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ValueKind,
}

/// One result row, columns in wire order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Cell)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column. Wire order is kept.
    pub fn push(&mut self, column: impl Into<String>, cell: Cell) {
        self.cells.push((column.into(), cell));
    }

    /// Converts a wire row, parsing the designated time column.
    ///
    /// With [`TimeColumn::Named`], a row that lacks the column is left as is.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::TimeParseError`](crate::SockqlError::TimeParseError)
    /// if the time column holds a value in no accepted format.
    pub fn from_raw(raw: RawRow, time_column: &TimeColumn) -> Result<Self> {
        let mut row = Row {
            cells: Vec::with_capacity(raw.len()),
        };

        for (i, (name, value)) in raw.into_iter().enumerate() {
            let is_time = match time_column {
                TimeColumn::First => i == 0,
                TimeColumn::Named(col) => *col == name,
                TimeColumn::Disabled => false,
            };

            let cell = if is_time {
                match parse_timestamp(&value, &name)? {
                    Some(ts) => Cell::Timestamp(ts),
                    None => Cell::Null,
                }
            } else {
                Cell::from_json(value)
            };
            row.cells.push((name, cell));
        }

        Ok(row)
    }

    /// Looks a cell up by column name.
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells.iter().find(|(name, _)| name == column).map(|(_, c)| c)
    }

    /// Looks a cell up by position.
    pub fn get_index(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index).map(|(_, c)| c)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.cells.iter().map(|(name, c)| (name.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, cell) in &self.cells {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

/// Decides column kinds from the first row. Empty input yields no columns.
///
/// The time column is always `Timestamp`, even when its first value is null.
pub fn classify_columns(rows: &[Row], time_column: &TimeColumn) -> Vec<Column> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };

    first
        .iter()
        .enumerate()
        .map(|(i, (name, cell))| {
            let is_time = match time_column {
                TimeColumn::First => i == 0,
                TimeColumn::Named(col) => col == name,
                TimeColumn::Disabled => false,
            };
            Column {
                name: name.to_string(),
                kind: if is_time { ValueKind::Timestamp } else { cell.kind() },
            }
        })
        .collect()
}
