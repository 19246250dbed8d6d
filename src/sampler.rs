use crate::annotation::{CallSite, CallType};
use crate::annotator::Annotator;
use crate::config::sampling_interval;
use crate::utils::errors::{AnnotationError, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Background task annotating a fixed set of kinds at a fixed rate.
pub struct Sampler {
    annotator: Arc<Annotator>,
    /// Rate in Hz
    rate: f64,
    is_running: Arc<AtomicBool>,
    iterations: Arc<AtomicUsize>,
    stop: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Start sampling `kinds` every `1 / rate` seconds, attributing rows to `site`.
    pub fn start(
        annotator: Arc<Annotator>,
        rate: f64,
        kinds: Vec<CallType>,
        site: CallSite,
    ) -> Result<Self> {
        let interval = sampling_interval(rate)?;
        if kinds.is_empty() {
            return Err(AnnotationError::Config("nothing to sample".to_string()));
        }

        let is_running = Arc::new(AtomicBool::new(true));
        let iterations = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(Notify::new());

        let handle = annotator.runtime_handle()?.spawn(Self::run_sampling_loop(
            Arc::clone(&annotator),
            kinds,
            site,
            interval,
            Arc::clone(&is_running),
            Arc::clone(&iterations),
            Arc::clone(&stop),
        ));

        info!("Sampling started in background at {} Hz", rate);
        Ok(Self {
            annotator,
            rate,
            is_running,
            iterations,
            stop,
            task_handle: Some(handle),
        })
    }

    async fn run_sampling_loop(
        annotator: Arc<Annotator>,
        kinds: Vec<CallType>,
        site: CallSite,
        interval: Duration,
        is_running: Arc<AtomicBool>,
        iterations: Arc<AtomicUsize>,
        stop: Arc<Notify>,
    ) {
        while is_running.load(Ordering::Relaxed) {
            let iteration = iterations.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Background sampling iteration {}", iteration);

            for kind in &kinds {
                if let Err(e) = annotator.annotate_async(*kind, site).await {
                    warn!("Sampling {} failed: {}", kind, e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.notified() => break,
            }
        }

        debug!(
            "Background sampling stopped after {} iterations",
            iterations.load(Ordering::Relaxed)
        );
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Completed loop iterations so far.
    pub fn iterations(&self) -> usize {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Stop the task and wait for it to finish.
    pub fn shutdown(&mut self) -> Result<()> {
        self.is_running.store(false, Ordering::Relaxed);
        self.stop.notify_one();

        let Some(handle) = self.task_handle.take() else {
            return Ok(());
        };
        let annotator = &self.annotator;
        let joined = if tokio::runtime::Handle::try_current().is_ok() {
            // block_on panics on a runtime thread
            std::thread::scope(|scope| {
                scope
                    .spawn(|| annotator.block_on(handle))
                    .join()
                    .unwrap_or_else(|_| {
                        Err(AnnotationError::Runtime("sampler join thread panicked".to_string()))
                    })
            })
        } else {
            annotator.block_on(handle)
        };
        joined?.map_err(|e| {
            AnnotationError::Runtime(format!("Sampling task did not stop cleanly: {}", e))
        })?;
        info!("Sampling stopped after {} iterations", self.iterations());
        Ok(())
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnnotateConfig;
    use crate::rank::NodeRank;
    use crate::sources::DummySource;
    use tempfile::TempDir;

    fn annotator(dir: &std::path::Path) -> Arc<Annotator> {
        let config = AnnotateConfig::default()
            .with_output_dir(dir)
            .with_hostname("node01")
            .with_node_rank(NodeRank::single());
        Arc::new(Annotator::new(&config, DummySource::new("node01")).unwrap())
    }

    fn site() -> CallSite {
        CallSite::new("src/sampler.rs", 1, "sampler")
    }

    #[test]
    fn test_sampler_writes_rows_until_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let annotator = annotator(temp_dir.path());

        let mut sampler = Sampler::start(
            Arc::clone(&annotator),
            50.0,
            vec![CallType::Power, CallType::Energy],
            site(),
        )
        .unwrap();
        assert!(sampler.is_running());
        std::thread::sleep(Duration::from_millis(200));
        sampler.shutdown().unwrap();
        assert!(!sampler.is_running());

        let iterations = sampler.iterations();
        assert!(iterations >= 1);
        assert_eq!(annotator.timings().rows_written, iterations * 2);

        // No rows after shutdown
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(annotator.timings().rows_written, iterations * 2);
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let temp_dir = TempDir::new().unwrap();
        let annotator = annotator(temp_dir.path());

        assert!(Sampler::start(Arc::clone(&annotator), 0.0, vec![CallType::Power], site()).is_err());
        assert!(Sampler::start(Arc::clone(&annotator), -2.0, vec![CallType::Power], site()).is_err());
        assert!(Sampler::start(Arc::clone(&annotator), 1.0, vec![], site()).is_err());
    }

    #[test]
    fn test_rejects_unrepresentable_rates() {
        let temp_dir = TempDir::new().unwrap();
        let annotator = annotator(temp_dir.path());

        let result = Sampler::start(Arc::clone(&annotator), 1e-20, vec![CallType::Power], site());
        assert!(matches!(result, Err(AnnotationError::Config(_))));
        assert_eq!(annotator.timings().rows_written, 0);
    }

    #[tokio::test]
    async fn test_shutdown_from_async_context() {
        let temp_dir = TempDir::new().unwrap();
        let annotator = annotator(temp_dir.path());

        let mut sampler =
            Sampler::start(Arc::clone(&annotator), 100.0, vec![CallType::Power], site()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sampler.shutdown().unwrap();
        assert!(!sampler.is_running());
        assert_eq!(annotator.timings().rows_written, sampler.iterations());

        let _restarted =
            Sampler::start(Arc::clone(&annotator), 100.0, vec![CallType::Energy], site()).unwrap();
        // dropped while still running, on a runtime thread
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let annotator = annotator(temp_dir.path());
        let mut sampler =
            Sampler::start(Arc::clone(&annotator), 1.0, vec![CallType::Energy], site()).unwrap();
        sampler.shutdown().unwrap();
        sampler.shutdown().unwrap();
    }
}
