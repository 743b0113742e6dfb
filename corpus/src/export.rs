//! Writing query results to CSV, TXT or JSON files.
//!
//! Every format emits the record's fields followed by a `_score` field
//! holding the cosine score rounded to four decimals.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::info;

use crate::error::{CorpusError, Result};
use crate::types::RecordMatch;

/// Name of the appended score field.
pub const SCORE_FIELD: &str = "_score";

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Txt,
    Json,
}

impl ExportFormat {
    /// Resolve the format from the output file's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "txt" => Ok(Self::Txt),
            "json" => Ok(Self::Json),
            _ => Err(CorpusError::UnsupportedExportFormat(
                path.display().to_string(),
            )),
        }
    }
}

/// Round a score to four decimals.
pub fn round_score(score: f32) -> f64 {
    (f64::from(score) * 10_000.0).round() / 10_000.0
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render results in `format`.
pub fn render(results: &[RecordMatch], format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Csv => render_csv(results),
        ExportFormat::Txt => Ok(render_txt(results).into_bytes()),
        ExportFormat::Json => render_json(results),
    }
}

fn render_csv(results: &[RecordMatch]) -> Result<Vec<u8>> {
    let Some(first) = results.first() else {
        return Ok(Vec::new());
    };
    let fields: Vec<&str> = first.record.keys().map(String::as_str).collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(fields.iter().copied().chain(std::iter::once(SCORE_FIELD)))?;
    for hit in results {
        let mut row: Vec<String> = fields
            .iter()
            .map(|field| hit.record.get(*field).map(display_value).unwrap_or_default())
            .collect();
        row.push(round_score(hit.score).to_string());
        writer.write_record(&row)?;
    }

    writer
        .into_inner()
        .map_err(|e| CorpusError::Io(e.into_error()))
}

fn render_txt(results: &[RecordMatch]) -> String {
    let mut out = String::new();
    for hit in results {
        out.push_str(&format!("Score: {}\n", round_score(hit.score)));
        for (key, value) in &hit.record {
            out.push_str(&format!("{key}: {}\n", display_value(value)));
        }
        out.push('\n');
    }
    out
}

fn render_json(results: &[RecordMatch]) -> Result<Vec<u8>> {
    let rows: Vec<IndexMap<&str, Value>> = results
        .iter()
        .map(|hit| {
            let mut row: IndexMap<&str, Value> = hit
                .record
                .iter()
                .map(|(k, v)| (k.as_str(), v.clone()))
                .collect();
            row.insert(SCORE_FIELD, Value::from(round_score(hit.score)));
            row
        })
        .collect();
    Ok(serde_json::to_vec_pretty(&rows)?)
}

/// Write results to `path`, choosing the format from its extension.
pub async fn export_results(results: &[RecordMatch], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let format = ExportFormat::from_path(path)?;
    let bytes = render(results, format)?;
    tokio::fs::write(path, bytes).await?;
    info!("Exported {} results to {}", results.len(), path.display());
    Ok(())
}
