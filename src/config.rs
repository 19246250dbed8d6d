use crate::rank::NodeRank;
use crate::sources::SourceKind;
use crate::utils::errors::{AnnotationError, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_OUTPUT_DIR: &str = "POWER_ANNOTATE_OUTPUT_DIR";
pub const ENV_SOURCE: &str = "POWER_ANNOTATE_SOURCE";
pub const ENV_HOSTNAME: &str = "POWER_ANNOTATE_HOSTNAME";
pub const ENV_RATE: &str = "POWER_ANNOTATE_RATE";

/// Sampling faster than this mostly measures the sampler itself.
pub const MAX_SAMPLE_RATE: f64 = 1000.0;
/// Rows kept in the in-memory session trace
pub const DEFAULT_TRACE_MAX_ROWS: usize = 100_000;

/// Settings for an [`Annotator`](crate::Annotator).
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotateConfig {
    /// Directory receiving the per-host CSV logs
    pub output_dir: PathBuf,
    /// Measurement source used by `global::init`
    pub source: SourceKind,
    /// Overrides the system host name in file names and payloads
    pub hostname: Option<String>,
    /// Overrides launcher-derived rank selection
    pub node_rank: Option<NodeRank>,
    /// Background sampling rate in Hz, none disables sampling
    pub sample_rate: Option<f64>,
    /// Most recent rows kept by the session trace
    pub trace_max_rows: usize,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            source: default_source(),
            hostname: None,
            node_rank: None,
            sample_rate: None,
            trace_max_rows: DEFAULT_TRACE_MAX_ROWS,
        }
    }
}

#[cfg(feature = "variorum")]
fn default_source() -> SourceKind {
    SourceKind::Variorum
}

#[cfg(not(feature = "variorum"))]
fn default_source() -> SourceKind {
    SourceKind::Rapl
}

impl AnnotateConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by any of the `POWER_ANNOTATE_*` variables `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_OUTPUT_DIR).filter(|v| !v.trim().is_empty()) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(source) = lookup(ENV_SOURCE) {
            config.source = source.parse()?;
        }
        if let Some(host) = lookup(ENV_HOSTNAME).filter(|v| !v.trim().is_empty()) {
            config.hostname = Some(host.trim().to_string());
        }
        if let Some(rate) = lookup(ENV_RATE) {
            let rate = rate.trim().parse::<f64>().map_err(|e| {
                AnnotationError::Config(format!("{} is not a number: {}", ENV_RATE, e))
            })?;
            config = config.with_sample_rate(rate)?;
        }
        Ok(config)
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.source = source;
        self
    }

    pub fn with_hostname(mut self, host: impl Into<String>) -> Self {
        self.hostname = Some(host.into());
        self
    }

    pub fn with_node_rank(mut self, node_rank: NodeRank) -> Self {
        self.node_rank = Some(node_rank);
        self
    }

    /// A rate of 0 disables sampling.
    pub fn with_sample_rate(mut self, rate: f64) -> Result<Self> {
        self.sample_rate = if rate == 0.0 {
            None
        } else {
            sampling_interval(rate)?;
            Some(rate)
        };
        Ok(self)
    }

    pub fn with_trace_max_rows(mut self, rows: usize) -> Self {
        self.trace_max_rows = rows;
        self
    }
}

/// Period for `rate` Hz; rates outside `(0, MAX_SAMPLE_RATE]` or with no `Duration` period are rejected.
pub(crate) fn sampling_interval(rate: f64) -> Result<Duration> {
    if !rate.is_finite() || rate <= 0.0 || rate > MAX_SAMPLE_RATE {
        return Err(AnnotationError::Config(format!(
            "sampling rate must be in (0, {}] Hz, got {}",
            MAX_SAMPLE_RATE, rate
        )));
    }
    Duration::try_from_secs_f64(1.0 / rate).map_err(|e| {
        AnnotationError::Config(format!("sampling rate {} Hz has no usable period: {}", rate, e))
    })
}
