use crate::annotation::{CallSite, CallType};
use crate::payload::NodeReading;
use crate::utils::errors::{AnnotationError, Result};
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Per-host CSV log for one measurement kind.
///
/// Layout: `Timestamp,File,line,caller_func_name,Node_Power|Node_Energy`.
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
    kind: CallType,
}

impl CsvLog {
    /// `<dir>/<host>_power_data.csv` or `<dir>/<host>_energy_data.csv`.
    pub fn for_host(dir: &Path, host: &str, kind: CallType) -> Result<Self> {
        let suffix = kind.file_suffix().ok_or_else(|| {
            AnnotationError::Config(format!("{} readings are not written to a log", kind))
        })?;
        Ok(Self {
            path: dir.join(format!("{}_{}", host, suffix)),
            kind,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> CallType {
        self.kind
    }

    pub fn header(&self) -> [&'static str; 5] {
        [
            "Timestamp",
            "File",
            "line",
            "caller_func_name",
            self.kind.column_name().unwrap_or("Value"),
        ]
    }

    /// Append one row, writing the header first if the file is empty.
    pub fn append(&self, site: &CallSite, reading: &NodeReading) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(self.header())?;
        }
        writer.write_record([
            reading.timestamp.to_string(),
            site.file.to_string(),
            site.line.to_string(),
            site.function.to_string(),
            format!("{:.6}", reading.value),
        ])?;
        writer.flush()?;
        Ok(())
    }
}
