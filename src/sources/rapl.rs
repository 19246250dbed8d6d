use crate::sources::PowerSource;
use crate::utils::errors::{AnnotationError, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_RAPL_PATH: &str = "/sys/class/powercap/intel-rapl";
/// Window used to derive power when there is no previous read.
const FIRST_POWER_WINDOW: Duration = Duration::from_millis(100);

/// Package domain: `intel-rapl:N` with its counter file and wrap range.
#[derive(Debug, Clone)]
struct PackageDomain {
    name: String,
    energy_path: PathBuf,
    max_energy_uj: u64,
}

#[derive(Debug, Clone)]
struct CounterState {
    at: Instant,
    /// Raw counter per package, same order as `RaplSource::packages`
    raw_uj: Vec<u64>,
    /// Energy accumulated since the first read
    total_uj: u128,
}

/// Node telemetry from the Linux powercap RAPL interface.
///
/// Node power and energy are the sums over CPU package domains.
pub struct RaplSource {
    pub rapl_path: PathBuf,
    host: String,
    packages: Vec<PackageDomain>,
    state: Mutex<Option<CounterState>>,
}

impl RaplSource {
    pub fn new(rapl_path: Option<PathBuf>, host: &str) -> Self {
        let rapl_path = rapl_path.unwrap_or_else(|| PathBuf::from(DEFAULT_RAPL_PATH));
        let packages = discover_packages(&rapl_path);
        info!(
            "RAPL source reading {} package domain(s) from {}",
            packages.len(),
            rapl_path.display()
        );
        Self {
            rapl_path,
            host: host.to_string(),
            packages,
            state: Mutex::new(None),
        }
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    fn read_counters(&self) -> Result<Vec<u64>> {
        if self.packages.is_empty() {
            return Err(AnnotationError::Source(format!(
                "no RAPL package domains under {}",
                self.rapl_path.display()
            )));
        }
        self.packages
            .iter()
            .map(|package| read_u64(&package.energy_path))
            .collect()
    }

    /// Advance the accumulated counter; returns (joules since first read, watts since previous read).
    fn advance(&self) -> Result<(f64, Option<f64>)> {
        let raw = self.read_counters()?;
        let now = Instant::now();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(previous) = state.as_ref() else {
            *state = Some(CounterState {
                at: now,
                raw_uj: raw,
                total_uj: 0,
            });
            return Ok((0.0, None));
        };

        let delta_uj: u128 = self
            .packages
            .iter()
            .zip(previous.raw_uj.iter().zip(&raw))
            .map(|(package, (&before, &after))| {
                counter_delta(before, after, package.max_energy_uj) as u128
            })
            .sum();
        let elapsed = now.duration_since(previous.at).as_secs_f64();
        let total_uj = previous.total_uj + delta_uj;
        *state = Some(CounterState {
            at: now,
            raw_uj: raw,
            total_uj,
        });

        let watts = (elapsed > 0.0).then(|| delta_uj as f64 / 1e6 / elapsed);
        Ok((total_uj as f64 / 1e6, watts))
    }

    fn payload(&self, field: &str, value: f64) -> String {
        json!({
            self.host.as_str(): {
                "timestamp": Utc::now().timestamp_micros(),
                field: value,
            }
        })
        .to_string()
    }
}

impl Default for RaplSource {
    fn default() -> Self {
        Self::new(None, "localhost")
    }
}

#[async_trait]
impl PowerSource for RaplSource {
    async fn power_json(&self) -> Result<String> {
        let watts = match self.advance()? {
            (_, Some(watts)) => watts,
            (_, None) => {
                tokio::time::sleep(FIRST_POWER_WINDOW).await;
                self.advance()?.1.unwrap_or(0.0)
            }
        };
        Ok(self.payload("power_node_watts", watts))
    }

    async fn energy_json(&self) -> Result<String> {
        let (joules, _) = self.advance()?;
        Ok(self.payload("energy_node_joules", joules))
    }

    async fn power_domain_json(&self) -> Result<String> {
        let domains: Vec<&str> = self.packages.iter().map(|p| p.name.as_str()).collect();
        Ok(json!({
            self.host.as_str(): {
                "timestamp": Utc::now().timestamp_micros(),
                "measurement": ["power_node", "energy_node"],
                "control": [],
                "rapl_domains": domains,
                "measurement_units": ["Watts", "Joules"],
            }
        })
        .to_string())
    }

    fn name(&self) -> &'static str {
        "rapl"
    }

    fn is_available() -> bool {
        Path::new(DEFAULT_RAPL_PATH).exists()
    }
}

/// Top-level `intel-rapl:N` directories, sorted by name.
fn discover_packages(root: &Path) -> Vec<PackageDomain> {
    let Ok(entries) = std::fs::read_dir(root) else {
        debug!("RAPL path {} is not readable", root.display());
        return Vec::new();
    };
    let mut packages: Vec<PackageDomain> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_package_name(&name) {
                return None;
            }
            let dir = entry.path();
            let energy_path = dir.join("energy_uj");
            if !energy_path.exists() {
                return None;
            }
            let max_energy_uj = read_u64(&dir.join("max_energy_range_uj")).unwrap_or(u64::MAX);
            Some(PackageDomain {
                name,
                energy_path,
                max_energy_uj,
            })
        })
        .collect();
    packages.sort_by(|a, b| a.name.cmp(&b.name));
    packages
}

fn is_package_name(name: &str) -> bool {
    name.strip_prefix("intel-rapl:")
        .is_some_and(|index| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
}

fn read_u64(path: &Path) -> Result<u64> {
    let text = std::fs::read_to_string(path)?;
    text.trim().parse::<u64>().map_err(|e| {
        AnnotationError::Source(format!("invalid counter in {}: {}", path.display(), e))
    })
}

/// Difference between two counter reads, accounting for one wrap at `max`.
fn counter_delta(previous: u64, current: u64, max: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        max.saturating_sub(previous).saturating_add(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::CallType;
    use crate::payload::parse_node_reading;
    use tempfile::TempDir;

    fn fake_package(root: &Path, name: &str, energy_uj: u64, max_uj: u64) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("energy_uj"), format!("{}\n", energy_uj)).unwrap();
        std::fs::write(dir.join("max_energy_range_uj"), format!("{}\n", max_uj)).unwrap();
    }

    fn set_energy(root: &Path, name: &str, energy_uj: u64) {
        std::fs::write(root.join(name).join("energy_uj"), format!("{}\n", energy_uj)).unwrap();
    }

    #[test]
    fn test_package_names() {
        assert!(is_package_name("intel-rapl:0"));
        assert!(is_package_name("intel-rapl:12"));
        assert!(!is_package_name("intel-rapl:0:1"));
        assert!(!is_package_name("intel-rapl:"));
        assert!(!is_package_name("energy_uj"));
    }

    #[test]
    fn test_counter_wrap() {
        assert_eq!(counter_delta(100, 150, 1000), 50);
        assert_eq!(counter_delta(900, 50, 1000), 150);
    }

    #[test]
    fn test_discovers_only_packages() {
        let temp_dir = TempDir::new().unwrap();
        fake_package(temp_dir.path(), "intel-rapl:0", 10, 1000);
        fake_package(temp_dir.path(), "intel-rapl:1", 10, 1000);
        fake_package(temp_dir.path(), "intel-rapl:0:0", 10, 1000);
        let source = RaplSource::new(Some(temp_dir.path().to_path_buf()), "node01");
        assert_eq!(source.package_count(), 2);
    }

    #[tokio::test]
    async fn test_energy_accumulates_across_packages() {
        let temp_dir = TempDir::new().unwrap();
        fake_package(temp_dir.path(), "intel-rapl:0", 1_000_000, 10_000_000);
        fake_package(temp_dir.path(), "intel-rapl:1", 9_000_000, 10_000_000);
        let source = RaplSource::new(Some(temp_dir.path().to_path_buf()), "node01");

        let first = source.energy_json().await.unwrap();
        assert_eq!(parse_node_reading(CallType::Energy, &first).unwrap().value, 0.0);

        set_energy(temp_dir.path(), "intel-rapl:0", 3_000_000);
        // wraps: 9.0 J -> 10.0 J max -> 0.5 J
        set_energy(temp_dir.path(), "intel-rapl:1", 500_000);

        let second = source.energy_json().await.unwrap();
        let joules = parse_node_reading(CallType::Energy, &second).unwrap().value;
        assert!((joules - 3.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_energy_sums_every_package() {
        let temp_dir = TempDir::new().unwrap();
        for index in 0..12 {
            fake_package(temp_dir.path(), &format!("intel-rapl:{}", index), 0, 10_000_000);
        }
        let source = RaplSource::new(Some(temp_dir.path().to_path_buf()), "node01");
        assert_eq!(source.package_count(), 12);

        source.energy_json().await.unwrap();
        for index in 0..12 {
            set_energy(temp_dir.path(), &format!("intel-rapl:{}", index), 1_000_000);
        }
        let json = source.energy_json().await.unwrap();
        let joules = parse_node_reading(CallType::Energy, &json).unwrap().value;
        assert!((joules - 12.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_first_power_read_uses_window() {
        let temp_dir = TempDir::new().unwrap();
        fake_package(temp_dir.path(), "intel-rapl:0", 0, 10_000_000);
        let source = RaplSource::new(Some(temp_dir.path().to_path_buf()), "node01");

        let json = source.power_json().await.unwrap();
        let reading = parse_node_reading(CallType::Power, &json).unwrap();
        // Counter never moved
        assert_eq!(reading.value, 0.0);
        assert!(reading.timestamp > 0);
    }

    #[tokio::test]
    async fn test_missing_domains_error() {
        let temp_dir = TempDir::new().unwrap();
        let source = RaplSource::new(Some(temp_dir.path().to_path_buf()), "node01");
        assert!(matches!(
            source.energy_json().await,
            Err(AnnotationError::Source(_))
        ));
    }
}
