//! Process-wide annotator behind the `annotate_*!()` macros.

use crate::annotation::{CallSite, CallType};
use crate::annotator::{Annotator, FinalizeReport};
use crate::config::AnnotateConfig;
use crate::payload::NodeReading;
use crate::sampler::Sampler;
use crate::sources::PowerSource;
use crate::utils::errors::Result;
use log::warn;
use std::sync::{Arc, Mutex, RwLock};

static ANNOTATOR: RwLock<Option<Arc<Annotator>>> = RwLock::new(None);
static SAMPLER: Mutex<Option<Sampler>> = Mutex::new(None);

/// Install the process-wide annotator using the source named in `config`.
///
/// Starts background sampling of power and energy when `config.sample_rate` is set.
pub fn init(config: &AnnotateConfig) -> Result<()> {
    install(config, Annotator::from_config(config)?)
}

pub fn init_with_source<S: PowerSource>(config: &AnnotateConfig, source: S) -> Result<()> {
    install(config, Annotator::new(config, source)?)
}

fn install(config: &AnnotateConfig, annotator: Annotator) -> Result<()> {
    let annotator = Arc::new(annotator);
    let sampler = match config.sample_rate {
        Some(rate) if annotator.is_reporter() => Some(Sampler::start(
            Arc::clone(&annotator),
            rate,
            vec![CallType::Power, CallType::Energy],
            CallSite::new(file!(), line!(), "background_sampler"),
        )?),
        _ => None,
    };

    let previous_sampler = std::mem::replace(
        &mut *SAMPLER.lock().unwrap_or_else(|p| p.into_inner()),
        sampler,
    );
    drop(previous_sampler);
    let previous = ANNOTATOR
        .write()
        .unwrap_or_else(|p| p.into_inner())
        .replace(annotator);
    if previous.is_some() {
        warn!("Annotator re-initialised; the previous instance was replaced without finalize");
    }
    Ok(())
}

pub fn is_initialized() -> bool {
    ANNOTATOR
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .is_some()
}

/// Best-effort annotation through the process-wide annotator; failures are logged.
pub fn annotate(kind: CallType, site: CallSite) -> Option<NodeReading> {
    let Some(annotator) = current() else {
        warn!("{} annotation at {} ignored: annotator not initialised", kind, site);
        return None;
    };
    match annotator.annotate(kind, site) {
        Ok(reading) => reading,
        Err(e) => {
            warn!("{} annotation at {} failed: {}", kind, site, e);
            None
        }
    }
}

/// Stop sampling, remove the process-wide annotator and report on it.
pub fn finalize() -> Option<FinalizeReport> {
    let sampler = SAMPLER.lock().unwrap_or_else(|p| p.into_inner()).take();
    if let Some(mut sampler) = sampler {
        if let Err(e) = sampler.shutdown() {
            warn!("{}", e);
        }
    }

    let annotator = ANNOTATOR
        .write()
        .unwrap_or_else(|p| p.into_inner())
        .take();
    match annotator {
        Some(annotator) => Some(annotator.finalize()),
        None => {
            warn!("finalize called without an initialised annotator");
            None
        }
    }
}

fn current() -> Option<Arc<Annotator>> {
    ANNOTATOR
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .as_ref()
        .map(Arc::clone)
}
