use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, SecondsFormat, Utc};
use optrack_core::{Channel, DomainError, Opportunity, Pipeline, Prospect, Record, Task};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};

const TABLE_CELL_MAX_CHARS: usize = 48;

/// Fixed column layout for one record kind.
pub trait Tabular: Record {
    const COLUMNS: &'static [&'static str];

    fn row(&self) -> Vec<String>;
}

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn opt_ts(value: Option<DateTime<Utc>>) -> String {
    value.map(ts).unwrap_or_default()
}

impl Tabular for Opportunity {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "category",
        "priority",
        "status",
        "url",
        "source",
        "description",
        "created_at",
        "updated_at",
        "submitted_at",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.name.clone(),
            self.category.to_string(),
            self.priority.to_string(),
            self.status.to_string(),
            self.url.clone(),
            self.source.clone().unwrap_or_default(),
            self.description.clone(),
            ts(self.created_at),
            ts(self.updated_at),
            opt_ts(self.submitted_at),
        ]
    }
}

impl Tabular for Prospect {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "role",
        "company",
        "email",
        "telegram_handle",
        "source",
        "priority",
        "status",
        "notes",
        "created_at",
        "updated_at",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.name.clone(),
            self.role.clone(),
            self.company.clone(),
            self.email.clone().unwrap_or_default(),
            self.telegram_handle.clone().unwrap_or_default(),
            self.source.clone().unwrap_or_default(),
            self.priority.to_string(),
            self.status.to_string(),
            self.notes.clone(),
            ts(self.created_at),
            ts(self.updated_at),
        ]
    }
}

impl Tabular for Channel {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "handle",
        "link",
        "category",
        "active",
        "last_scraped_at",
        "created_at",
        "updated_at",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.handle.clone(),
            self.link(),
            self.category.clone(),
            self.active.to_string(),
            opt_ts(self.last_scraped_at),
            ts(self.created_at),
            ts(self.updated_at),
        ]
    }
}

impl Tabular for Task {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "title",
        "priority",
        "status",
        "roi",
        "due_at",
        "started_at",
        "completed_at",
        "description",
        "created_at",
        "updated_at",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.title.clone(),
            self.priority.to_string(),
            self.status.as_str().to_string(),
            format!("{:.1}", self.roi_score()),
            opt_ts(self.due_at),
            opt_ts(self.started_at),
            opt_ts(self.completed_at),
            self.description.clone(),
            ts(self.created_at),
            ts(self.updated_at),
        ]
    }
}

/// Named columns plus one stringified row per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Header row followed by data rows, the shape spreadsheet importers take.
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        std::iter::once(self.columns.clone())
            .chain(self.rows.iter().cloned())
            .collect()
    }
}

pub fn export_table<'a, T, I>(records: I) -> Table
where
    T: Tabular + 'a,
    I: IntoIterator<Item = &'a T>,
{
    Table {
        columns: T::COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows: records.into_iter().map(Tabular::row).collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Table,
    Tsv,
    Json,
    Parquet,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Table => "table",
            ExportFormat::Tsv => "tsv",
            ExportFormat::Json => "json",
            ExportFormat::Parquet => "parquet",
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, ExportFormat::Parquet)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(ExportFormat::Table),
            "tsv" => Ok(ExportFormat::Tsv),
            "json" => Ok(ExportFormat::Json),
            "parquet" => Ok(ExportFormat::Parquet),
            other => Err(DomainError::validation(format!(
                "unknown export format {other:?} (expected table, tsv, json or parquet)"
            ))),
        }
    }
}

fn truncate_cell(cell: &str) -> String {
    let flat = cell.replace(['\n', '\r', '\t'], " ");
    if flat.chars().count() <= TABLE_CELL_MAX_CHARS {
        return flat;
    }
    let mut out: String = flat.chars().take(TABLE_CELL_MAX_CHARS - 1).collect();
    out.push('…');
    out
}

/// Aligned plain-text table for terminals. Long cells are shortened.
pub fn render_table(table: &Table) -> String {
    let cells: Vec<Vec<String>> = table
        .to_rows()
        .iter()
        .map(|row| row.iter().map(|c| truncate_cell(c)).collect())
        .collect();
    let mut widths = vec![0usize; table.columns.len()];
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for (index, row) in cells.iter().enumerate() {
        let line = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{cell:<width$}", width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
        if index == 0 {
            let rule = widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("  ");
            out.push_str(&rule);
            out.push('\n');
        }
    }
    out
}

/// Tab-separated rows for spreadsheet import; tabs and newlines inside cells
/// become spaces.
pub fn render_tsv(table: &Table) -> String {
    table
        .to_rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.replace(['\t', '\n', '\r'], " "))
                .collect::<Vec<_>>()
                .join("\t")
        })
        .map(|line| line + "\n")
        .collect()
}

pub fn render_json(table: &Table) -> Result<String> {
    let objects: Vec<serde_json::Map<String, serde_json::Value>> = table
        .rows
        .iter()
        .map(|row| {
            table
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned().map(serde_json::Value::String))
                .collect()
        })
        .collect();
    let mut text = serde_json::to_string_pretty(&objects).context("serializing export rows")?;
    text.push('\n');
    Ok(text)
}

fn render_parquet(table: &Table) -> Result<Vec<u8>> {
    let schema = Arc::new(Schema::new(
        table
            .columns
            .iter()
            .map(|name| ArrowField::new(name, DataType::Utf8, false))
            .collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = (0..table.columns.len())
        .map(|col| {
            let values = table
                .rows
                .iter()
                .map(|row| Some(row[col].as_str()))
                .collect::<Vec<_>>();
            Arc::new(StringArray::from(values)) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(schema, arrays).context("building export record batch")?;

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None)
        .context("opening parquet writer")?;
    writer.write(&batch).context("writing export record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(buf)
}

/// Serialize a table in the requested format.
pub fn encode(table: &Table, format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Table => Ok(render_table(table).into_bytes()),
        ExportFormat::Tsv => Ok(render_tsv(table).into_bytes()),
        ExportFormat::Json => Ok(render_json(table)?.into_bytes()),
        ExportFormat::Parquet => render_parquet(table),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub format: String,
    pub rows: usize,
    pub bytes: u64,
    pub sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Encode and atomically write an export file.
pub fn write_export(path: &Path, table: &Table, format: ExportFormat) -> Result<ExportArtifact> {
    if path.as_os_str().is_empty() {
        bail!("export path is empty");
    }
    let bytes = encode(table, format)?;
    optrack_storage::write_atomic(path, &bytes)
        .with_context(|| format!("writing export {}", path.display()))?;
    tracing::info!(path = %path.display(), %format, rows = table.rows.len(), "export written");
    Ok(ExportArtifact {
        path: path.to_path_buf(),
        format: format.to_string(),
        rows: table.rows.len(),
        bytes: bytes.len() as u64,
        sha256: sha256_hex(&bytes),
    })
}
