//! Calibration table access.
//!
//! FITS binary tables are read by an external collaborator; the engine only
//! sees named extensions with keywords and numeric columns through
//! [`CalibrationSource`]. [`CalibrationFile`] is the bundled JSON-backed
//! source used by the CLI and the fixtures.

mod ascii;

pub use ascii::{parse_ascii_columns, AsciiColumns};

use crate::domain::{ObservationInfo, XrespError, XrespResult};
use crate::numerics::GridUnit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordValue {
    Flag(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl KeywordValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Real(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Flag(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Real(value) if value.fract() == 0.0 => Some(*value as i64),
            Self::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.trim().to_string()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Real(value) => Some(value.to_string()),
            Self::Flag(value) => Some(value.to_string()),
        }
    }
}

/// Column cells: one number per row, or a variable-length array per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnData {
    Fixed(Vec<f64>),
    Variable(Vec<Vec<f64>>),
}

impl ColumnData {
    pub fn row_count(&self) -> usize {
        match self {
            Self::Fixed(values) => values.len(),
            Self::Variable(rows) => rows.len(),
        }
    }

    pub fn row(&self, row: usize) -> &[f64] {
        match self {
            Self::Fixed(values) => std::slice::from_ref(&values[row]),
            Self::Variable(rows) => &rows[row],
        }
    }
}

/// A per-row field that may be stored as a column or as a constant keyword.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowField<'a> {
    Column(&'a ColumnData),
    Constant(f64),
}

impl<'a> RowField<'a> {
    pub fn row(&self, row: usize) -> &[f64] {
        match self {
            Self::Column(column) => column.row(row),
            Self::Constant(value) => std::slice::from_ref(value),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableExtension {
    pub name: String,
    #[serde(default)]
    pub keywords: BTreeMap<String, KeywordValue>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnData>,
    #[serde(default)]
    pub column_keywords: BTreeMap<String, BTreeMap<String, KeywordValue>>,
}

impl TableExtension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_keyword(mut self, name: &str, value: KeywordValue) -> Self {
        self.keywords.insert(name.to_string(), value);
        self
    }

    pub fn with_column(mut self, name: &str, data: ColumnData) -> Self {
        self.columns.insert(name.to_string(), data);
        self
    }

    pub fn with_column_keyword(mut self, column: &str, name: &str, value: KeywordValue) -> Self {
        self.column_keywords
            .entry(column.to_string())
            .or_default()
            .insert(name.to_string(), value);
        self
    }

    pub fn keyword(&self, name: &str) -> Option<&KeywordValue> {
        self.keywords
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn keyword_f64(&self, name: &str) -> Option<f64> {
        self.keyword(name).and_then(KeywordValue::as_f64)
    }

    pub fn keyword_i64(&self, name: &str) -> Option<i64> {
        self.keyword(name).and_then(KeywordValue::as_i64)
    }

    pub fn keyword_text(&self, name: &str) -> Option<String> {
        self.keyword(name).and_then(KeywordValue::as_text)
    }

    pub fn require_keyword_f64(&self, name: &str) -> XrespResult<f64> {
        self.keyword_f64(name).ok_or_else(|| {
            XrespError::input_validation(
                "TABLE.KEYWORD",
                format!(
                    "extension '{}' is missing required numeric keyword '{}'",
                    self.name, name
                ),
            )
        })
    }

    pub fn column_keyword(&self, column: &str, name: &str) -> Option<&KeywordValue> {
        self.column_keywords
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(column))
            .and_then(|(_, keywords)| {
                keywords
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// A one-number-per-row column, length-checked against the table.
    pub fn fixed_column(&self, name: &str) -> XrespResult<Option<&[f64]>> {
        match self.column(name) {
            None => Ok(None),
            Some(ColumnData::Fixed(values)) => Ok(Some(values.as_slice())),
            Some(ColumnData::Variable(_)) => Err(XrespError::input_validation(
                "TABLE.COLUMN_SHAPE",
                format!(
                    "column '{}' in extension '{}' must hold one value per row",
                    name, self.name
                ),
            )),
        }
    }

    pub fn require_fixed_column(&self, name: &str) -> XrespResult<&[f64]> {
        self.fixed_column(name)?.ok_or_else(|| {
            XrespError::input_validation(
                "TABLE.COLUMN",
                format!(
                    "extension '{}' is missing required column '{}'",
                    self.name, name
                ),
            )
        })
    }

    /// Unit of a column from its `TUNIT` keyword, or `default` when absent.
    pub fn column_unit(&self, column: &str, default: GridUnit) -> XrespResult<GridUnit> {
        match self.column_keyword(column, "TUNIT").and_then(KeywordValue::as_text) {
            Some(unit) if !unit.is_empty() => unit.parse(),
            _ => Ok(default),
        }
    }

    pub fn observation_info(&self) -> ObservationInfo {
        ObservationInfo {
            object: self.keyword_text("OBJECT"),
            instrument: self.keyword_text("INSTRUME"),
            grating: self.keyword_text("GRATING"),
            order: self.keyword_i64("TG_M"),
            part: self.keyword_i64("TG_PART"),
            source_id: self.keyword_i64("TG_SRCID"),
        }
    }

    /// Looks the field up as a column first, then as a constant keyword.
    pub fn row_field(&self, name: &str) -> Option<RowField<'_>> {
        if let Some(column) = self.column(name) {
            return Some(RowField::Column(column));
        }
        self.keyword_f64(name).map(RowField::Constant)
    }

    pub fn require_row_field(&self, name: &str) -> XrespResult<RowField<'_>> {
        self.row_field(name).ok_or_else(|| {
            XrespError::input_validation(
                "TABLE.FIELD",
                format!(
                    "extension '{}' has neither a column nor a keyword named '{}'",
                    self.name, name
                ),
            )
        })
    }
}

/// Read access to a calibration product made of named table extensions.
pub trait CalibrationSource {
    /// Human readable origin, used in diagnostics.
    fn origin(&self) -> &str;

    fn extensions(&self) -> &[TableExtension];

    /// First extension whose name matches one of `candidates`, in candidate order.
    fn find_extension(&self, candidates: &[&str]) -> Option<&TableExtension> {
        candidates.iter().find_map(|candidate| {
            self.extensions()
                .iter()
                .find(|extension| extension.name.trim().eq_ignore_ascii_case(candidate))
        })
    }

    fn require_extension(&self, candidates: &[&str]) -> XrespResult<&TableExtension> {
        self.find_extension(candidates).ok_or_else(|| {
            XrespError::input_validation(
                "TABLE.EXTENSION",
                format!(
                    "'{}' has no extension named any of [{}]",
                    self.origin(),
                    candidates.join(", ")
                ),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationFile {
    #[serde(default)]
    pub origin: String,
    pub extensions: Vec<TableExtension>,
}

impl CalibrationFile {
    pub fn new(origin: impl Into<String>, extensions: Vec<TableExtension>) -> Self {
        Self {
            origin: origin.into(),
            extensions,
        }
    }

    pub fn from_json_str(origin: &str, source: &str) -> XrespResult<Self> {
        let mut file: CalibrationFile = serde_json::from_str(source).map_err(|source| {
            XrespError::input_validation(
                "TABLE.PARSE",
                format!("failed to parse calibration table '{origin}': {source}"),
            )
        })?;
        if file.origin.is_empty() {
            file.origin = origin.to_string();
        }
        Ok(file)
    }
}

impl CalibrationSource for CalibrationFile {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn extensions(&self) -> &[TableExtension] {
        &self.extensions
    }
}

pub fn load_calibration_file(path: impl AsRef<Path>) -> XrespResult<CalibrationFile> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| {
        XrespError::io_system(
            "IO.TABLE_READ",
            format!("failed to read calibration table '{}': {}", path.display(), source),
        )
    })?;
    CalibrationFile::from_json_str(&path.display().to_string(), &source)
}

/// Converts a floating point table cell to a non-negative integer.
pub(crate) fn cell_to_usize(value: f64, what: &str, row: usize) -> XrespResult<usize> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(XrespError::input_validation(
            "TABLE.INTEGER_CELL",
            format!("{what} at row {row} must be a non-negative integer, got {value}"),
        ));
    }
    Ok(value as usize)
}
