//! Tabular export of batch results.
//!
//! A [`ResultTable`] has one row per processed image. Columns are `Arquivo`,
//! the five canonical columns, and `Status` only when at least one image
//! failed. Cells a row has no value for are filled with `N/A`.
//!
//! Tables are written as CSV. [`ResultTable::merge`] concatenates previously
//! exported tables: the header is the union of all headers in first-seen
//! order, and rows that are exact duplicates of an earlier row are dropped.

use crate::error::Form2SheetError;
use crate::output::{Column, ImageResult, FILE_COLUMN, NOT_AVAILABLE, STATUS_COLUMN};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ResultTable {
    /// Build a table from raw headers and rows. Short rows are padded with
    /// empty cells, long rows truncated.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, String::new());
                r
            })
            .collect();
        Self { headers, rows }
    }

    pub fn from_results(results: &[ImageResult]) -> Self {
        let mut headers: Vec<String> = Vec::with_capacity(Column::ALL.len() + 2);
        headers.push(FILE_COLUMN.to_string());
        headers.extend(Column::ALL.iter().map(|c| c.header().to_string()));

        let has_errors = results.iter().any(|r| !r.is_ok());
        if has_errors {
            headers.push(STATUS_COLUMN.to_string());
        }

        let rows = results
            .iter()
            .map(|r| {
                let mut row = vec![r.file_name.clone()];
                match &r.outcome {
                    Ok(record) => {
                        row.extend(record.cells().map(|(_, v)| v.to_string()));
                        if has_errors {
                            row.push(NOT_AVAILABLE.to_string());
                        }
                    }
                    Err(e) => {
                        row.extend(Column::ALL.iter().map(|_| NOT_AVAILABLE.to_string()));
                        row.push(e.to_string());
                    }
                }
                row
            })
            .collect();

        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `header` in row `row`, if both exist.
    pub fn cell(&self, row: usize, header: &str) -> Option<&str> {
        let col = self.headers.iter().position(|h| h == header)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// Concatenate tables, unioning headers and dropping duplicate rows.
    ///
    /// Cells for columns a source table did not have are left empty. Of
    /// several identical rows only the first is kept.
    pub fn merge<I>(tables: I) -> Self
    where
        I: IntoIterator<Item = ResultTable>,
    {
        let tables: Vec<ResultTable> = tables.into_iter().collect();

        let mut headers: Vec<String> = Vec::new();
        for t in &tables {
            for h in &t.headers {
                if !headers.contains(h) {
                    headers.push(h.clone());
                }
            }
        }

        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut rows = Vec::new();
        for t in &tables {
            let positions: Vec<Option<usize>> = headers
                .iter()
                .map(|h| t.headers.iter().position(|th| th == h))
                .collect();
            for src in &t.rows {
                let row: Vec<String> = positions
                    .iter()
                    .map(|p| p.map(|i| src[i].clone()).unwrap_or_default())
                    .collect();
                if seen.insert(row.clone()) {
                    rows.push(row);
                }
            }
        }

        debug!("Merged {} tables into {} rows", tables.len(), rows.len());
        Self { headers, rows }
    }

    // ── CSV ──────────────────────────────────────────────────────────────

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(&self.headers)?;
        for row in &self.rows {
            w.write_record(row)?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String, csv::Error> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write atomically: temp file in the destination directory, then rename.
    pub fn write_csv_file(&self, path: &Path) -> Result<(), Form2SheetError> {
        let write_err = |source: std::io::Error| Form2SheetError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        self.write_csv(tmp.as_file()).map_err(|source| Form2SheetError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        info!("Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }

    pub fn read_csv_file(path: &Path) -> Result<Self, Form2SheetError> {
        if !path.exists() {
            return Err(Form2SheetError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let csv_err = |source: csv::Error| Form2SheetError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        debug!("Read {} rows from {}", rows.len(), path.display());
        Ok(Self::new(headers, rows))
    }

    // ── JSON ─────────────────────────────────────────────────────────────

    /// One JSON object per row, keys in header order.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let obj: Map<String, Value> = self
                        .headers
                        .iter()
                        .zip(row)
                        .map(|(h, v)| (h.clone(), Value::String(v.clone())))
                        .collect();
                    Value::Object(obj)
                })
                .collect(),
        )
    }
}
