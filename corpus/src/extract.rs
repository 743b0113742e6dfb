//! Row extraction from tabular source files.
//!
//! The format tag is resolved once, when a [`SourceFile`] is built; the
//! [`TabularExtractor`] just dispatches on it. Delimited text goes through
//! the `csv` crate and workbooks through `calamine`.

use std::io::Cursor;

use calamine::{Data, DataType, Reader, Sheets, open_workbook_auto_from_rs};
use serde_json::Value;
use tracing::debug;

use crate::error::{CorpusError, Result};
use crate::types::{Record, SourceFile, SourceFormat};

/// Reads column headers and rows out of a source file.
pub trait DataExtractor: Send + Sync {
    /// Sheet names, or `None` for formats without sheets.
    fn list_sheets(&self, file: &SourceFile) -> Result<Option<Vec<String>>>;

    /// Header names of `sheet` (first sheet when `None`).
    fn list_columns(&self, file: &SourceFile, sheet: Option<&str>) -> Result<Vec<String>>;

    /// Rows restricted to `columns`, in source order.
    ///
    /// Absent or empty cells are left out of a record, and rows where
    /// every selected column is empty are skipped entirely.
    fn extract(
        &self,
        file: &SourceFile,
        sheet: Option<&str>,
        columns: &[String],
    ) -> Result<Vec<Record>>;
}

/// The built-in extractor for every [`SourceFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TabularExtractor;

impl DataExtractor for TabularExtractor {
    fn list_sheets(&self, file: &SourceFile) -> Result<Option<Vec<String>>> {
        match file.format() {
            SourceFormat::Csv | SourceFormat::Tsv => Ok(None),
            SourceFormat::Workbook => Ok(Some(open_workbook(file)?.sheet_names())),
        }
    }

    fn list_columns(&self, file: &SourceFile, sheet: Option<&str>) -> Result<Vec<String>> {
        match file.format() {
            SourceFormat::Csv => delimited_columns(file.bytes(), b','),
            SourceFormat::Tsv => delimited_columns(file.bytes(), b'\t'),
            SourceFormat::Workbook => {
                let rows = workbook_rows(file, sheet)?;
                Ok(rows
                    .first()
                    .map(|header| header.iter().filter_map(header_name).collect())
                    .unwrap_or_default())
            }
        }
    }

    fn extract(
        &self,
        file: &SourceFile,
        sheet: Option<&str>,
        columns: &[String],
    ) -> Result<Vec<Record>> {
        let records = match file.format() {
            SourceFormat::Csv => delimited_records(file.bytes(), b',', columns)?,
            SourceFormat::Tsv => delimited_records(file.bytes(), b'\t', columns)?,
            SourceFormat::Workbook => workbook_records(file, sheet, columns)?,
        };
        debug!("Extracted {} records from {}", records.len(), file.name());
        Ok(records)
    }
}

fn delimited_reader(bytes: &[u8], delimiter: u8) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes)
}

fn delimited_columns(bytes: &[u8], delimiter: u8) -> Result<Vec<String>> {
    let mut reader = delimited_reader(bytes, delimiter);
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

fn delimited_records(bytes: &[u8], delimiter: u8, columns: &[String]) -> Result<Vec<Record>> {
    let mut reader = delimited_reader(bytes, delimiter);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let positions = column_positions(&headers, columns)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut record = Record::new();
        for (name, index) in &positions {
            if let Some(value) = row.get(*index).filter(|v| !v.is_empty()) {
                record.insert(name.clone(), Value::String(value.to_string()));
            }
        }
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

/// Map each selected column to its header position.
fn column_positions(headers: &[String], columns: &[String]) -> Result<Vec<(String, usize)>> {
    columns
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|h| h == column)
                .map(|index| (column.clone(), index))
                .ok_or_else(|| CorpusError::UnknownColumn(column.clone()))
        })
        .collect()
}

fn open_workbook(file: &SourceFile) -> Result<Sheets<Cursor<Vec<u8>>>> {
    open_workbook_auto_from_rs(Cursor::new(file.bytes().to_vec()))
        .map_err(|e| CorpusError::Extraction(format!("{}: {e}", file.name())))
}

/// All rows of a sheet, header included.
fn workbook_rows(file: &SourceFile, sheet: Option<&str>) -> Result<Vec<Vec<Data>>> {
    let mut workbook = open_workbook(file)?;
    let names = workbook.sheet_names();

    let name = match sheet {
        Some(sheet) if names.iter().any(|n| n == sheet) => sheet.to_string(),
        Some(sheet) => return Err(CorpusError::UnknownSheet(sheet.to_string())),
        None => names
            .first()
            .cloned()
            .ok_or_else(|| CorpusError::Extraction(format!("{} has no sheets", file.name())))?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| CorpusError::Extraction(format!("{}[{name}]: {e}", file.name())))?;
    Ok(range.rows().map(<[Data]>::to_vec).collect())
}

fn workbook_records(
    file: &SourceFile,
    sheet: Option<&str>,
    columns: &[String],
) -> Result<Vec<Record>> {
    let rows = workbook_rows(file, sheet)?;
    let Some((header, body)) = rows.split_first() else {
        return match columns.first() {
            Some(column) => Err(CorpusError::UnknownColumn(column.clone())),
            None => Ok(Vec::new()),
        };
    };

    let headers: Vec<String> = header
        .iter()
        .map(|cell| header_name(cell).unwrap_or_default())
        .collect();
    let positions = column_positions(&headers, columns)?;

    let mut records = Vec::new();
    for row in body {
        let mut record = Record::new();
        for (name, index) in &positions {
            if let Some(value) = row.get(*index).and_then(cell_value) {
                record.insert(name.clone(), value);
            }
        }
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

fn header_name(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Largest magnitude at which every whole `f64` is exact.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert a cell to a record value; `None` means absent.
///
/// Workbooks store every number as a float, so whole values come back as
/// integers. Date cells become `YYYY-MM-DD HH:MM:SS` text rather than the
/// serial day number.
fn cell_value(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(Value::String(s.clone())),
        Data::Int(i) => Some(Value::from(*i)),
        Data::Float(f) if f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT_INT => {
            Some(Value::from(*f as i64))
        }
        Data::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number),
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::DateTime(dt) if !dt.is_duration() => Some(datetime_value(cell)),
        Data::DateTimeIso(_) => Some(datetime_value(cell)),
        other => Some(Value::String(other.to_string())),
    }
}

fn datetime_value(cell: &Data) -> Value {
    match cell.as_datetime() {
        Some(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
        None => Value::String(cell.to_string()),
    }
}
