use crate::annotation::{CallSite, CallType};
use crate::config::AnnotateConfig;
use crate::csv_log::CsvLog;
use crate::payload::{NodeReading, parse_node_reading};
use crate::rank::NodeRank;
use crate::sources::PowerSource;
use crate::trace::{FunctionSummary, SessionTrace, TraceConfig, TraceRow, TraceStats};
use crate::utils::errors::{AnnotationError, Result};
use crate::utils::hostinfo::resolve_hostname;
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Time spent on behalf of the application, accumulated over all annotations.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Timings {
    /// Querying the measurement source and unwrapping its payload
    pub source: Duration,
    /// Appending CSV rows
    pub file_write: Duration,
    pub rows_written: usize,
}

/// Per-host power/energy annotator
///
/// Only the node-local rank 0 process queries the measurement source and
/// appends to `<host>_power_data.csv` / `<host>_energy_data.csv`; on every
/// other rank annotations are no-ops.
///
/// Owns the tokio runtime that drives the measurement source. It can be
/// used and dropped from synchronous code and from inside another runtime.
pub struct Annotator {
    host: String,
    node_rank: NodeRank,
    power_log: CsvLog,
    energy_log: CsvLog,
    source: Arc<dyn PowerSource>,
    timings: Mutex<Timings>,
    trace: Mutex<SessionTrace>,
    /// Taken only by `Drop`
    runtime: Option<tokio::runtime::Runtime>,
}

impl Annotator {
    /// Annotator over an explicit source instance.
    pub fn new<S: PowerSource>(config: &AnnotateConfig, source: S) -> Result<Self> {
        Self::with_shared_source(config, Arc::new(source))
    }

    /// Annotator over the source named by `config.source`.
    pub fn from_config(config: &AnnotateConfig) -> Result<Self> {
        let host = resolve_hostname(config.hostname.as_deref());
        let source = config.source.build(&host)?;
        Self::with_shared_source(config, Arc::from(source))
    }

    pub fn with_shared_source(config: &AnnotateConfig, source: Arc<dyn PowerSource>) -> Result<Self> {
        let host = resolve_hostname(config.hostname.as_deref());
        let node_rank = config.node_rank.unwrap_or_else(NodeRank::from_env);

        if node_rank.is_reporter() {
            std::fs::create_dir_all(&config.output_dir)?;
        }
        let power_log = CsvLog::for_host(&config.output_dir, &host, CallType::Power)?;
        let energy_log = CsvLog::for_host(&config.output_dir, &host, CallType::Energy)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("power-annotate")
            .enable_all()
            .build()
            .map_err(|e| AnnotationError::Runtime(format!("Failed to create Tokio runtime: {}", e)))?;

        info!(
            "Annotating {} (node rank {} of {}) with the {} source",
            host,
            node_rank.rank,
            node_rank.size,
            source.name()
        );

        Ok(Self {
            host,
            node_rank,
            power_log,
            energy_log,
            source,
            timings: Mutex::new(Timings::default()),
            trace: Mutex::new(SessionTrace::with_config(TraceConfig::new(config.trace_max_rows))?),
            runtime: Some(runtime),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn node_rank(&self) -> NodeRank {
        self.node_rank
    }

    pub fn is_reporter(&self) -> bool {
        self.node_rank.is_reporter()
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub fn power_log_path(&self) -> &Path {
        self.power_log.path()
    }

    pub fn energy_log_path(&self) -> &Path {
        self.energy_log.path()
    }

    pub fn timings(&self) -> Timings {
        *lock(&self.timings)
    }

    pub fn trace_stats(&self) -> TraceStats {
        lock(&self.trace).stats()
    }

    /// Query the source and append one row for `kind`.
    ///
    /// Returns `Ok(None)` on non-reporting ranks and for power-domain queries.
    /// Safe to call from inside another tokio runtime.
    pub fn annotate(&self, kind: CallType, site: CallSite) -> Result<Option<NodeReading>> {
        if !self.node_rank.is_reporter() {
            return Ok(None);
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            // block_on panics on a runtime thread
            return std::thread::scope(|scope| {
                match scope
                    .spawn(|| self.block_on(self.annotate_async(kind, site))?)
                    .join()
                {
                    Ok(result) => result,
                    Err(_) => Err(AnnotationError::Runtime(
                        "annotation thread panicked".to_string(),
                    )),
                }
            });
        }
        self.block_on(self.annotate_async(kind, site))?
    }

    pub async fn annotate_async(&self, kind: CallType, site: CallSite) -> Result<Option<NodeReading>> {
        if !self.node_rank.is_reporter() {
            return Ok(None);
        }

        let started = Instant::now();
        let (payload, log) = match kind {
            CallType::Power => (self.source.power_json().await?, &self.power_log),
            CallType::Energy => (self.source.energy_json().await?, &self.energy_log),
            CallType::PowerDomain => {
                let payload = self.source.power_domain_json().await?;
                lock(&self.timings).source += started.elapsed();
                info!("Power domain info at {}: {}", site, payload);
                return Ok(None);
            }
        };
        let reading = parse_node_reading(kind, &payload)?;
        let source_delay = started.elapsed();

        let write_started = Instant::now();
        log.append(&site, &reading)?;
        let write_delay = write_started.elapsed();

        {
            let mut timings = lock(&self.timings);
            timings.source += source_delay;
            timings.file_write += write_delay;
            timings.rows_written += 1;
        }
        if let Err(e) = lock(&self.trace).append(&[TraceRow::new(kind, &site, &reading)]) {
            warn!("Reading at {} not added to the session trace: {}", site, e);
        }
        debug!(
            "{} {:.6} at {} (source {:?}, write {:?})",
            kind, reading.value, site, source_delay, write_delay
        );
        Ok(Some(reading))
    }

    /// Summarise the session. Rank 0 logs host and delays; every rank logs its file paths.
    pub fn finalize(&self) -> FinalizeReport {
        let timings = self.timings();
        let (trace_stats, summary) = {
            let trace = lock(&self.trace);
            (trace.stats(), trace.summary())
        };

        let report = FinalizeReport {
            host: self.host.clone(),
            node_rank: self.node_rank,
            source_delay: timings.source,
            file_write_delay: timings.file_write,
            rows_written: timings.rows_written,
            power_path: self.power_log.path().to_path_buf(),
            energy_path: self.energy_log.path().to_path_buf(),
            trace_stats,
            summary,
        };

        if self.node_rank.is_reporter() {
            info!("host:{}", report.host);
            info!(
                "Time delay due to {} source {:.6}s",
                self.source.name(),
                report.source_delay.as_secs_f64()
            );
            info!(
                "Time delay due to file writes {:.6}s",
                report.file_write_delay.as_secs_f64()
            );
            for entry in &report.summary {
                info!(
                    "{} {}: {} samples, mean {:.3}, min {:.3}, max {:.3}",
                    entry.function, entry.kind, entry.samples, entry.mean, entry.min, entry.max
                );
            }
        }
        info!(
            "Energy data written to: {} Power data to: {}",
            report.energy_path.display(),
            report.power_path.display()
        );
        report
    }

    fn runtime(&self) -> Result<&tokio::runtime::Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| AnnotationError::Runtime("annotator runtime already shut down".to_string()))
    }

    pub(crate) fn runtime_handle(&self) -> Result<tokio::runtime::Handle> {
        Ok(self.runtime()?.handle().clone())
    }

    /// Must not be called on a runtime thread.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        Ok(self.runtime()?.block_on(future))
    }
}

impl Drop for Annotator {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            // A blocking shutdown panics on a runtime thread
            runtime.shutdown_background();
        }
    }
}

/// Outcome of [`Annotator::finalize`].
#[derive(Debug, Clone)]
pub struct FinalizeReport {
    pub host: String,
    pub node_rank: NodeRank,
    pub source_delay: Duration,
    pub file_write_delay: Duration,
    pub rows_written: usize,
    pub power_path: PathBuf,
    pub energy_path: PathBuf,
    pub trace_stats: TraceStats,
    pub summary: Vec<FunctionSummary>,
}

impl fmt::Display for FinalizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "host: {} (node rank {})", self.host, self.node_rank.rank)?;
        writeln!(f, "source delay: {:.6}s", self.source_delay.as_secs_f64())?;
        writeln!(f, "file write delay: {:.6}s", self.file_write_delay.as_secs_f64())?;
        writeln!(f, "rows written: {}", self.rows_written)?;
        writeln!(f, "power data: {}", self.power_path.display())?;
        write!(f, "energy data: {}", self.energy_path.display())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::DummySource;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FailingSource;

    #[async_trait]
    impl PowerSource for FailingSource {
        async fn power_json(&self) -> Result<String> {
            Err(AnnotationError::Source("variorum: JSON get node power failed.".to_string()))
        }

        async fn energy_json(&self) -> Result<String> {
            Ok("{".to_string())
        }

        fn name(&self) -> &'static str {
            "failing"
        }

        fn is_available() -> bool {
            true
        }
    }

    /// Takes a measurable time per query
    struct SlowSource;

    #[async_trait]
    impl PowerSource for SlowSource {
        async fn power_json(&self) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(r#"{"node01": {"timestamp": 1, "power_node_watts": 80.0}}"#.to_string())
        }

        async fn energy_json(&self) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(r#"{"node01": {"timestamp": 1, "energy_node_joules": 8.0}}"#.to_string())
        }

        fn name(&self) -> &'static str {
            "slow"
        }

        fn is_available() -> bool {
            true
        }
    }

    fn config(dir: &Path, rank: NodeRank) -> AnnotateConfig {
        AnnotateConfig::default()
            .with_output_dir(dir)
            .with_hostname("node01")
            .with_node_rank(rank)
    }

    fn site() -> CallSite {
        CallSite::new("src/annotator.rs", 1, "test")
    }

    #[test]
    fn test_reporter_writes_rows() {
        let temp_dir = TempDir::new().unwrap();
        let annotator = Annotator::new(
            &config(temp_dir.path(), NodeRank::single()),
            DummySource::with_profile("node01", 100.0, 0.0),
        )
        .unwrap();

        let power = annotator.annotate(CallType::Power, site()).unwrap().unwrap();
        assert_eq!(power.value, 100.0);
        annotator.annotate(CallType::Energy, site()).unwrap().unwrap();

        assert_eq!(
            annotator.power_log_path(),
            temp_dir.path().join("node01_power_data.csv")
        );
        let content = std::fs::read_to_string(annotator.power_log_path()).unwrap();
        assert!(content.starts_with("Timestamp,File,line,caller_func_name,Node_Power\n"));
        assert!(content.contains(",src/annotator.rs,1,test,100.000000"));
        assert!(annotator.energy_log_path().exists());

        let timings = annotator.timings();
        assert_eq!(timings.rows_written, 2);
    }

    #[test]
    fn test_non_reporter_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("logs");
        let annotator = Annotator::new(&config(&out, NodeRank::new(1, 4)), FailingSource).unwrap();

        assert!(annotator.annotate(CallType::Power, site()).unwrap().is_none());
        assert!(!annotator.power_log_path().exists());
        assert!(!out.exists());
        assert_eq!(annotator.timings(), Timings::default());
    }

    #[test]
    fn test_source_failure_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let annotator =
            Annotator::new(&config(temp_dir.path(), NodeRank::single()), FailingSource).unwrap();

        assert!(matches!(
            annotator.annotate(CallType::Power, site()),
            Err(AnnotationError::Source(_))
        ));
        assert!(matches!(
            annotator.annotate(CallType::Energy, site()),
            Err(AnnotationError::Json(_))
        ));
        assert!(matches!(
            annotator.annotate(CallType::PowerDomain, site()),
            Err(AnnotationError::Unsupported(_))
        ));
        assert!(!annotator.power_log_path().exists());
        assert!(!annotator.energy_log_path().exists());
        assert_eq!(annotator.timings().rows_written, 0);
    }

    #[test]
    fn test_power_domain_writes_no_row() {
        let temp_dir = TempDir::new().unwrap();
        let annotator = Annotator::new(
            &config(temp_dir.path(), NodeRank::single()),
            DummySource::new("node01"),
        )
        .unwrap();

        assert!(annotator.annotate(CallType::PowerDomain, site()).unwrap().is_none());
        assert!(!annotator.power_log_path().exists());
        assert_eq!(annotator.timings().rows_written, 0);
    }

    #[test]
    fn test_finalize_report() {
        let temp_dir = TempDir::new().unwrap();
        let annotator = Annotator::new(
            &config(temp_dir.path(), NodeRank::single()),
            DummySource::with_profile("node01", 150.0, 0.0),
        )
        .unwrap();
        for _ in 0..3 {
            annotator.annotate(CallType::Power, site()).unwrap();
        }

        let report = annotator.finalize();
        assert_eq!(report.host, "node01");
        assert_eq!(report.rows_written, 3);
        assert_eq!(report.trace_stats.row_count, 3);
        assert_eq!(report.summary.len(), 1);
        assert_eq!(report.summary[0].function, "test");
        assert_eq!(report.summary[0].mean, 150.0);
        assert!(report.to_string().contains("node01_power_data.csv"));
    }

    #[test]
    fn test_timings_accumulate_over_calls() {
        let temp_dir = TempDir::new().unwrap();
        let annotator =
            Annotator::new(&config(temp_dir.path(), NodeRank::single()), SlowSource).unwrap();

        annotator.annotate(CallType::Power, site()).unwrap();
        let first = annotator.timings();
        assert!(first.source >= Duration::from_millis(5));
        assert!(first.file_write > Duration::ZERO);

        annotator.annotate(CallType::Energy, site()).unwrap();
        let second = annotator.timings();
        assert!(second.source >= first.source + Duration::from_millis(5));
        assert!(second.file_write > first.file_write);
        assert_eq!(second.rows_written, 2);

        let report = annotator.finalize();
        assert_eq!(report.source_delay, second.source);
        assert_eq!(report.file_write_delay, second.file_write);
    }

    #[tokio::test]
    async fn test_sync_annotate_inside_runtime() {
        let temp_dir = TempDir::new().unwrap();
        let annotator = Annotator::new(
            &config(temp_dir.path(), NodeRank::single()),
            DummySource::new("node01"),
        )
        .unwrap();

        assert!(annotator.annotate(CallType::Energy, site()).unwrap().is_some());
        assert!(
            annotator
                .annotate_async(CallType::Power, site())
                .await
                .unwrap()
                .is_some()
        );
        drop(annotator);
    }
}
