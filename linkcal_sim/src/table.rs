//! Persisted calibration result table.
//!
//! The table has one slot per configuration entry, pre-allocated empty and
//! filled in entry order. Loading checks the stored column names and types
//! against [`calibration_schema`] and every stored row against them; any
//! difference is a [`SweepError::SchemaMismatch`].
//!
//! Stores overwrite the whole table on every save.

use crate::error::SweepError;
use linkcal_env::PreambleFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Value type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ColumnType::Integer => value.is_u64(),
            ColumnType::Real => value.is_number(),
            ColumnType::Text => value.is_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

impl Column {
    fn new(name: &str, kind: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Columns of the calibration table, in order.
pub fn calibration_schema() -> Vec<Column> {
    vec![
        Column::new("config_index", ColumnType::Integer),
        Column::new("format", ColumnType::Text),
        Column::new("num_rx_antennas", ColumnType::Integer),
        Column::new("scs_khz", ColumnType::Real),
        Column::new("cyclic_shift", ColumnType::Integer),
        Column::new("threshold", ColumnType::Real),
        Column::new("pfa_awgn", ColumnType::Real),
        Column::new("pd_awgn", ColumnType::Real),
        Column::new("pfa_fading", ColumnType::Real),
        Column::new("pd_fading", ColumnType::Real),
    ]
}

/// Calibration result of one configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRow {
    pub config_index: usize,
    pub format: PreambleFormat,
    pub num_rx_antennas: usize,
    pub scs_khz: f64,
    pub cyclic_shift: usize,
    pub threshold: f64,
    pub pfa_awgn: f64,
    pub pd_awgn: f64,
    pub pfa_fading: f64,
    pub pd_fading: f64,
}

impl CalibrationRow {
    fn probabilities(&self) -> [f64; 4] {
        [self.pfa_awgn, self.pd_awgn, self.pfa_fading, self.pd_fading]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    columns: Vec<Column>,
    rows: Vec<Option<CalibrationRow>>,
}

impl ResultTable {
    /// Creates a table with `len` empty rows.
    pub fn new(len: usize) -> Self {
        Self {
            columns: calibration_schema(),
            rows: vec![None; len],
        }
    }

    /// Parses and validates a stored table.
    pub fn from_value(value: Value) -> Result<Self, SweepError> {
        let object = value
            .as_object()
            .ok_or_else(|| SweepError::SchemaMismatch("table is not an object".into()))?;

        let columns: Vec<Column> = object
            .get("columns")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| SweepError::SchemaMismatch(format!("columns: {}", e)))?
            .ok_or_else(|| SweepError::SchemaMismatch("missing columns".into()))?;
        let expected = calibration_schema();
        if columns != expected {
            let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
            return Err(SweepError::SchemaMismatch(format!(
                "stored columns {:?} differ from the expected schema",
                names
            )));
        }

        let rows = object
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| SweepError::SchemaMismatch("missing rows".into()))?;
        for (index, row) in rows.iter().enumerate() {
            check_row(index, row, &expected)?;
        }

        let rows: Vec<Option<CalibrationRow>> = rows
            .iter()
            .cloned()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| SweepError::SchemaMismatch(format!("rows: {}", e)))?;
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Option<CalibrationRow>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&CalibrationRow> {
        self.rows.get(index).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of filled rows.
    pub fn completed(&self) -> usize {
        self.rows.iter().filter(|row| row.is_some()).count()
    }

    /// Index after the last filled row.
    pub fn resume_index(&self) -> usize {
        self.rows
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1)
    }

    /// Stores `row` in its slot.
    pub fn set_row(&mut self, row: CalibrationRow) -> Result<(), SweepError> {
        let index = row.config_index;
        if index >= self.rows.len() {
            return Err(SweepError::Assertion(format!(
                "row {} outside a table of {} rows",
                index,
                self.rows.len()
            )));
        }
        if !(row.threshold.is_finite()
            && row.probabilities().iter().all(|p| (0.0..=1.0).contains(p)))
        {
            return Err(SweepError::Assertion(format!(
                "row {} holds invalid values: {:?}",
                index, row
            )));
        }
        self.rows[index] = Some(row);
        Ok(())
    }
}

fn check_row(index: usize, row: &Value, columns: &[Column]) -> Result<(), SweepError> {
    let object = match row {
        Value::Null => return Ok(()),
        Value::Object(object) => object,
        _ => {
            return Err(SweepError::SchemaMismatch(format!(
                "row {} is neither empty nor an object",
                index
            )))
        }
    };

    if object.len() != columns.len() {
        return Err(SweepError::SchemaMismatch(format!(
            "row {} has {} fields, expected {}",
            index,
            object.len(),
            columns.len()
        )));
    }
    for column in columns {
        match object.get(&column.name) {
            Some(value) if column.kind.matches(value) => {}
            Some(value) => {
                return Err(SweepError::SchemaMismatch(format!(
                    "row {}: column '{}' expects {:?}, found {}",
                    index, column.name, column.kind, value
                )))
            }
            None => {
                return Err(SweepError::SchemaMismatch(format!(
                    "row {}: missing column '{}'",
                    index, column.name
                )))
            }
        }
    }
    Ok(())
}

/// Durable storage for the result table.
pub trait TableStore {
    /// Returns the stored table, or `None` if nothing was stored yet.
    fn load(&self) -> Result<Option<ResultTable>, SweepError>;

    /// Replaces the stored table.
    fn save(&mut self, table: &ResultTable) -> Result<(), SweepError>;
}

/// JSON file store.
///
/// Saves write a temporary sibling file and rename it over the target, so
/// the file on disk is always a complete table.
#[derive(Debug, Clone)]
pub struct JsonTableStore {
    path: PathBuf,
}

impl JsonTableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TableStore for JsonTableStore {
    fn load(&self) -> Result<Option<ResultTable>, SweepError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| SweepError::SchemaMismatch(format!("{}: {}", self.path.display(), e)))?;
        ResultTable::from_value(value).map(Some)
    }

    fn save(&mut self, table: &ResultTable) -> Result<(), SweepError> {
        let json = serde_json::to_string_pretty(table)?;
        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        debug!("Saved {} rows to {}", table.completed(), self.path.display());
        Ok(())
    }
}

/// In-memory store holding the serialized table.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableStore {
    value: Option<Value>,
    saves: usize,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with raw JSON.
    pub fn with_value(value: Value) -> Self {
        Self {
            value: Some(value),
            saves: 0,
        }
    }

    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl TableStore for MemoryTableStore {
    fn load(&self) -> Result<Option<ResultTable>, SweepError> {
        self.value
            .clone()
            .map(ResultTable::from_value)
            .transpose()
    }

    fn save(&mut self, table: &ResultTable) -> Result<(), SweepError> {
        self.value = Some(serde_json::to_value(table)?);
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(index: usize) -> CalibrationRow {
        CalibrationRow {
            config_index: index,
            format: PreambleFormat::B4,
            num_rx_antennas: 2,
            scs_khz: 30.0,
            cyclic_shift: 12,
            threshold: 11.25,
            pfa_awgn: 0.00095,
            pd_awgn: 0.99,
            pfa_fading: 0.001,
            pd_fading: 0.9,
        }
    }

    #[test]
    fn test_resume_index() {
        let mut table = ResultTable::new(4);
        assert_eq!(table.resume_index(), 0);
        table.set_row(row(0)).unwrap();
        table.set_row(row(2)).unwrap();
        assert_eq!(table.resume_index(), 3);
        assert_eq!(table.completed(), 2);
        assert!(table.row(1).is_none());
    }

    #[test]
    fn test_set_row_rejects_invalid() {
        let mut table = ResultTable::new(2);
        assert!(matches!(table.set_row(row(2)), Err(SweepError::Assertion(_))));

        let bad = CalibrationRow {
            pd_awgn: 1.5,
            ..row(1)
        };
        assert!(matches!(table.set_row(bad), Err(SweepError::Assertion(_))));
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut table = ResultTable::new(3);
        table.set_row(row(1)).unwrap();

        let mut store = MemoryTableStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&table).unwrap();
        assert_eq!(store.load().unwrap(), Some(table));
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn test_renamed_column_is_schema_mismatch() {
        let mut value = serde_json::to_value(ResultTable::new(1)).unwrap();
        value["columns"][5]["name"] = json!("thresh");
        let store = MemoryTableStore::with_value(value);
        assert!(matches!(store.load(), Err(SweepError::SchemaMismatch(_))));
    }

    #[test]
    fn test_wrong_value_type_is_schema_mismatch() {
        let mut table = ResultTable::new(1);
        table.set_row(row(0)).unwrap();
        let mut value = serde_json::to_value(&table).unwrap();
        value["rows"][0]["threshold"] = json!("high");

        let err = ResultTable::from_value(value).unwrap_err();
        assert!(matches!(err, SweepError::SchemaMismatch(_)));
    }

    #[test]
    fn test_missing_field_is_schema_mismatch() {
        let mut table = ResultTable::new(1);
        table.set_row(row(0)).unwrap();
        let mut value = serde_json::to_value(&table).unwrap();
        value["rows"][0]
            .as_object_mut()
            .unwrap()
            .remove("pd_fading");

        assert!(ResultTable::from_value(value).is_err());
        assert!(ResultTable::from_value(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_json_store_replaces_file() {
        let dir = std::env::temp_dir().join(format!("linkcal-table-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut store = JsonTableStore::new(dir.join("calibration.json"));
        assert!(store.load().unwrap().is_none());

        let mut table = ResultTable::new(2);
        store.save(&table).unwrap();
        table.set_row(row(0)).unwrap();
        store.save(&table).unwrap();

        assert_eq!(store.load().unwrap(), Some(table));
        assert!(!store.temp_path().exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
