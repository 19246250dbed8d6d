//! Session trace
//!
//! Keeps the most recent readings written during this process's lifetime in a
//! polars DataFrame, and running per-call-site statistics over all of them, so
//! finalize can report without reading the CSV logs back.
//!
//! # Examples
//!
//! ```ignore
//! let mut trace = SessionTrace::with_config(TraceConfig::new(10_000))?;
//! trace.append(&rows)?;
//! let per_function = trace.summary();
//! ```
use crate::annotation::{CallSite, CallType};
use crate::config::DEFAULT_TRACE_MAX_ROWS;
use crate::payload::NodeReading;
use crate::utils::errors::{AnnotationError, Result};
use itertools::multiunzip;
use polars::prelude::*;
use std::collections::BTreeMap;

/// One row of the trace
#[derive(Debug, Clone)]
pub struct TraceRow {
    pub timestamp: i64,
    pub kind: CallType,
    pub file: String,
    pub line: u32,
    pub function: String,
    pub value: f64,
}

impl TraceRow {
    pub fn new(kind: CallType, site: &CallSite, reading: &NodeReading) -> Self {
        Self {
            timestamp: i64::try_from(reading.timestamp).unwrap_or(i64::MAX),
            kind,
            file: site.file.to_string(),
            line: site.line,
            function: site.function.to_string(),
            value: reading.value,
        }
    }
}

/// Retention of the trace DataFrame
#[derive(Debug, Clone, PartialEq)]
pub struct TraceConfig {
    /// Rows kept after a cleanup
    pub max_rows: usize,
    /// Rows allowed past `max_rows` before an append triggers cleanup
    pub cleanup_slack: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_MAX_ROWS)
    }
}

impl TraceConfig {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows,
            cleanup_slack: (max_rows / 10).max(1),
        }
    }

    pub fn with_cleanup_slack(mut self, cleanup_slack: usize) -> Self {
        self.cleanup_slack = cleanup_slack;
        self
    }
}

/// DataFrame: timestamp | kind | file | line | function | value
pub struct SessionTrace {
    data: DataFrame,
    config: TraceConfig,
    /// Rows appended over the whole session, retained or not
    total_rows: usize,
    /// Keyed by (function, kind)
    summaries: BTreeMap<(String, String), FunctionSummary>,
}

impl SessionTrace {
    pub fn new() -> Result<Self> {
        Self::with_config(TraceConfig::default())
    }

    pub fn with_config(config: TraceConfig) -> Result<Self> {
        let data = df![
            "timestamp" => Vec::<i64>::new(),
            "kind" => Vec::<String>::new(),
            "file" => Vec::<String>::new(),
            "line" => Vec::<u32>::new(),
            "function" => Vec::<String>::new(),
            "value" => Vec::<f64>::new(),
        ]
        .map_err(|e| AnnotationError::Trace(format!("Failed to create trace DataFrame: {}", e)))?;
        Ok(Self {
            data,
            config,
            total_rows: 0,
            summaries: BTreeMap::new(),
        })
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Rows currently retained
    pub fn row_count(&self) -> usize {
        self.data.height()
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    /// Append rows, dropping the oldest once the trace grows past its retention bound.
    pub fn append(&mut self, rows: &[TraceRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let (timestamps, kinds, files, lines, functions, values): (
            Vec<i64>,
            Vec<String>,
            Vec<String>,
            Vec<u32>,
            Vec<String>,
            Vec<f64>,
        ) = multiunzip(rows.iter().map(|row| {
            (
                row.timestamp,
                row.kind.as_str().to_string(),
                row.file.clone(),
                row.line,
                row.function.clone(),
                row.value,
            )
        }));

        let new_data = df![
            "timestamp" => timestamps,
            "kind" => kinds,
            "file" => files,
            "line" => lines,
            "function" => functions,
            "value" => values,
        ]
        .map_err(|e| AnnotationError::Trace(format!("Failed to create trace rows: {}", e)))?;

        self.data = self
            .data
            .vstack(&new_data)
            .map_err(|e| AnnotationError::Trace(format!("Failed to append trace data: {}", e)))?;

        self.total_rows += rows.len();
        for row in rows {
            self.record(row);
        }

        if self.data.height() > self.config.max_rows.saturating_add(self.config.cleanup_slack) {
            self.cleanup();
        }
        Ok(())
    }

    /// Keep only the newest `max_rows` rows, compacted into a single chunk.
    pub fn cleanup(&mut self) {
        let height = self.data.height();
        if height > self.config.max_rows {
            let offset = (height - self.config.max_rows) as i64;
            self.data = self.data.slice(offset, self.config.max_rows);
        }
        self.data.as_single_chunk_par();
    }

    /// Cleanup regardless of the slack
    pub fn force_cleanup(&mut self) {
        self.cleanup()
    }

    fn record(&mut self, row: &TraceRow) {
        if row.value == crate::payload::MISSING_VALUE {
            return;
        }
        self.summaries
            .entry((row.function.clone(), row.kind.as_str().to_string()))
            .and_modify(|s| s.add(row.value))
            .or_insert_with(|| FunctionSummary::first(&row.function, row.kind.as_str(), row.value));
    }

    pub fn stats(&self) -> TraceStats {
        let timestamps: Vec<i64> = self
            .data
            .column("timestamp")
            .ok()
            .and_then(|col| col.i64().ok())
            .map(|ts| ts.iter().flatten().collect())
            .unwrap_or_default();

        TraceStats {
            row_count: self.data.height(),
            total_rows: self.total_rows,
            oldest_timestamp: timestamps.iter().copied().min(),
            newest_timestamp: timestamps.iter().copied().max(),
        }
    }

    /// Per (function, kind) statistics over every appended row, retained or not.
    /// Rows carrying the missing-value sentinel are skipped.
    pub fn summary(&self) -> Vec<FunctionSummary> {
        self.summaries.values().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceStats {
    /// Rows retained in the DataFrame
    pub row_count: usize,
    /// Rows appended over the session
    pub total_rows: usize,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

impl TraceStats {
    /// Span of data in source timestamp units (newest - oldest)
    pub fn data_span(&self) -> Option<i64> {
        match (self.oldest_timestamp, self.newest_timestamp) {
            (Some(oldest), Some(newest)) => Some(newest - oldest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSummary {
    pub function: String,
    pub kind: String,
    pub samples: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl FunctionSummary {
    fn first(function: &str, kind: &str, value: f64) -> Self {
        Self {
            function: function.to_string(),
            kind: kind.to_string(),
            samples: 1,
            mean: value,
            min: value,
            max: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.samples += 1;
        self.mean += (value - self.mean) / self.samples as f64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}
