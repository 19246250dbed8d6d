//! Per-host power and energy annotations for MPI jobs.
//!
//! Call sites record node-level readings from a telemetry source into
//! `<host>_power_data.csv` and `<host>_energy_data.csv`; only the node-local
//! rank 0 process of each host reports.
//!
//! ```ignore
//! node_power_annotate::global::init(&AnnotateConfig::from_env()?)?;
//! node_power_annotate::annotate_power!();
//! solve();
//! node_power_annotate::annotate_energy!();
//! let report = node_power_annotate::global::finalize();
//! ```

pub mod utils {
    pub mod errors;
    pub mod hostinfo;
    pub mod logger;
}

pub mod annotation;
pub mod annotator;
pub mod config;
pub mod csv_log;
pub mod global;
pub mod payload;
pub mod rank;
pub mod sampler;
pub mod sources;
pub mod trace;

pub use annotation::{CallSite, CallType};
pub use annotator::{Annotator, FinalizeReport, Timings};
pub use config::AnnotateConfig;
pub use payload::NodeReading;
pub use rank::NodeRank;
pub use sampler::Sampler;
pub use sources::{DummySource, PowerSource, RaplSource, SourceKind};
pub use utils::errors::{AnnotationError, Result};
