use crate::sources::PowerSource;
use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rand::Rng;
use serde_json::json;
use std::sync::Mutex;
use std::time::Instant;

/// Synthetic node telemetry: power around a baseline, energy integrated since creation.
pub struct DummySource {
    host: String,
    baseline_watts: f64,
    jitter_watts: f64,
    started: Instant,
    /// Energy accumulated up to `(last read, joules)`
    integral: Mutex<(Instant, f64)>,
}

impl DummySource {
    pub fn new(host: &str) -> Self {
        Self::with_profile(host, 250.0, 25.0)
    }

    pub fn with_profile(host: &str, baseline_watts: f64, jitter_watts: f64) -> Self {
        let now = Instant::now();
        Self {
            host: host.to_string(),
            baseline_watts,
            jitter_watts: jitter_watts.abs(),
            started: now,
            integral: Mutex::new((now, 0.0)),
        }
    }

    fn sample_watts(&self) -> f64 {
        if self.jitter_watts == 0.0 {
            return self.baseline_watts;
        }
        let jitter = rand::thread_rng().gen_range(-self.jitter_watts..=self.jitter_watts);
        (self.baseline_watts + jitter).max(0.0)
    }

    fn accumulated_joules(&self) -> f64 {
        let mut integral = self
            .integral
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(integral.0).as_secs_f64();
        integral.1 += self.sample_watts() * elapsed;
        integral.0 = now;
        integral.1
    }
}

impl Default for DummySource {
    fn default() -> Self {
        Self::new("localhost")
    }
}

#[async_trait]
impl PowerSource for DummySource {
    async fn power_json(&self) -> Result<String> {
        let payload = json!({
            self.host.as_str(): {
                "timestamp": Utc::now().timestamp_micros(),
                "power_node_watts": self.sample_watts(),
            }
        });
        Ok(payload.to_string())
    }

    async fn energy_json(&self) -> Result<String> {
        let payload = json!({
            self.host.as_str(): {
                "timestamp": Utc::now().timestamp_micros(),
                "energy_node_joules": self.accumulated_joules(),
            }
        });
        Ok(payload.to_string())
    }

    async fn power_domain_json(&self) -> Result<String> {
        debug!(
            "Dummy power domain queried {:.3}s after start",
            self.started.elapsed().as_secs_f64()
        );
        let payload = json!({
            self.host.as_str(): {
                "timestamp": Utc::now().timestamp_micros(),
                "measurement": ["power_node", "energy_node"],
                "control": [],
                "unsupported": ["power_cpu", "power_mem", "power_gpu"],
                "measurement_units": ["Watts", "Joules"],
            }
        });
        Ok(payload.to_string())
    }

    fn name(&self) -> &'static str {
        "dummy"
    }

    fn is_available() -> bool {
        true // Dummy is always available
    }
}
