//! Variorum telemetry through its C API. Enabled with the `variorum` cargo feature;
//! links against `libvariorum`.

use crate::sources::PowerSource;
use crate::utils::errors::{AnnotationError, Result};
use async_trait::async_trait;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

#[link(name = "variorum")]
unsafe extern "C" {
    fn variorum_get_power_json(get_power_obj_str: *mut *mut c_char) -> c_int;
    fn variorum_get_energy_json(get_energy_obj_str: *mut *mut c_char) -> c_int;
    fn variorum_get_node_power_domain_info_json(get_domain_obj_str: *mut *mut c_char) -> c_int;
}

type JsonCall = unsafe extern "C" fn(*mut *mut c_char) -> c_int;

/// Node-level power and energy as reported by Variorum.
#[derive(Debug, Default, Clone, Copy)]
pub struct VariorumSource;

impl VariorumSource {
    fn call(&self, what: &'static str, function: JsonCall) -> Result<String> {
        let mut raw: *mut c_char = std::ptr::null_mut();
        // SAFETY: Variorum writes a malloc'd, NUL-terminated string into `raw` on success.
        let status = unsafe { function(&mut raw) };
        let text = if raw.is_null() {
            None
        } else {
            // SAFETY: non-null and NUL-terminated per the Variorum API; freed right after copying.
            let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
            unsafe { libc::free(raw.cast()) };
            Some(text)
        };

        if status != 0 {
            return Err(AnnotationError::Source(format!(
                "variorum: JSON get node {} failed (status {})",
                what, status
            )));
        }
        text.ok_or_else(|| {
            AnnotationError::Source(format!("variorum: empty {} payload", what))
        })
    }
}

#[async_trait]
impl PowerSource for VariorumSource {
    async fn power_json(&self) -> Result<String> {
        self.call("power", variorum_get_power_json)
    }

    async fn energy_json(&self) -> Result<String> {
        self.call("energy", variorum_get_energy_json)
    }

    async fn power_domain_json(&self) -> Result<String> {
        self.call("power domain info", variorum_get_node_power_domain_info_json)
    }

    fn name(&self) -> &'static str {
        "variorum"
    }

    fn is_available() -> bool {
        true
    }
}
