/* src/health/mod.rs */

//! Liveness probing for records. A [`HealthTest`] describes one probe
//! against one target; the [`HealthTestRunner`] keeps exactly one running
//! scheduler per distinct test fingerprint and answers health lookups.

pub mod probes;
pub mod runner;
mod scheduler;

pub use probes::{Probe, ProbeOutcome};
pub use runner::HealthTestRunner;

use crate::error::HealthError;
use serde_json::{Map, Value};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const DEFAULT_FREQUENCY: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RETRIES: u32 = 2;

/// What the status registry knows about one test target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Source of health state consulted when picking answers.
pub trait HealthCheck: Send + Sync {
    fn status(&self, test: &HealthTest) -> HealthStatus;
}

/// Timing and threshold knobs shared by every probe kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HealthTestParameters {
    pub frequency: Duration,
    pub retry_time: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub healthy_initially: bool,
    pub global: bool,
}

impl Default for HealthTestParameters {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY,
            retry_time: default_retry_time(DEFAULT_FREQUENCY),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            healthy_initially: false,
            global: false,
        }
    }
}

fn default_retry_time(frequency: Duration) -> Duration {
    (frequency / 5).max(Duration::from_secs(1))
}

/// One probe against one target (an IP, or nothing for global probes).
pub struct HealthTest {
    pub ip: Option<IpAddr>,
    pub params: HealthTestParameters,
    probe: Arc<dyn Probe>,
    healthy: AtomicBool,
}

impl HealthTest {
    pub fn new(ip: Option<IpAddr>, params: HealthTestParameters, probe: Arc<dyn Probe>) -> Self {
        let healthy = AtomicBool::new(params.healthy_initially);
        Self {
            ip,
            params,
            probe,
            healthy,
        }
    }

    /// Builds a test template from a zone's `health` object. The template has
    /// no target; records derive their own with [`HealthTest::for_ip`].
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, HealthError> {
        let kind = config
            .get("type")
            .and_then(Value::as_str)
            .ok_or(HealthError::MissingParameter("type"))?;
        let probe = probes::build(kind, config)?;

        let frequency = seconds(config, "frequency")?.unwrap_or(DEFAULT_FREQUENCY);
        let retry_time = seconds(config, "retry_time")?.unwrap_or_else(|| default_retry_time(frequency));
        let timeout = seconds(config, "timeout")?.unwrap_or(DEFAULT_TIMEOUT);
        let retries = match config.get("retries") {
            None => DEFAULT_RETRIES,
            Some(v) => v
                .as_u64()
                .map(|n| n.max(1) as u32)
                .ok_or_else(|| HealthError::InvalidParameter {
                    name: "retries",
                    reason: format!("expected a positive integer, got {}", v),
                })?,
        };
        let healthy_initially = config
            .get("healthy_initially")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| probe.healthy_initially());

        let params = HealthTestParameters {
            frequency,
            retry_time,
            timeout,
            retries,
            healthy_initially,
            global: probe.is_global(),
        };
        Ok(Self::new(None, params, probe))
    }

    /// A copy of this test aimed at `ip`, starting from the template's
    /// configured initial health.
    pub fn for_ip(&self, ip: IpAddr) -> Self {
        Self::new(Some(ip), self.params.clone(), self.probe.clone())
    }

    /// Canonical identity used to share one scheduler between equivalent
    /// tests. Global tests leave the IP out so all records share one probe.
    pub fn fingerprint(&self) -> String {
        let ip = match (self.params.global, self.ip) {
            (false, Some(ip)) => ip.to_string(),
            _ => String::new(),
        };
        format!(
            "{}/{}/{}/{}/{}/{}/{}",
            ip,
            self.params.frequency.as_secs_f64(),
            self.params.retry_time.as_secs_f64(),
            self.params.timeout.as_secs_f64(),
            self.params.retries,
            self.params.healthy_initially,
            self.probe.identity()
        )
    }

    pub fn probe(&self) -> &Arc<dyn Probe> {
        &self.probe
    }

    /// The health last known to this caller, used when no scheduler exists.
    pub fn local_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_local_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

impl Clone for HealthTest {
    fn clone(&self) -> Self {
        Self {
            ip: self.ip,
            params: self.params.clone(),
            probe: self.probe.clone(),
            healthy: AtomicBool::new(self.local_healthy()),
        }
    }
}

impl fmt::Debug for HealthTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthTest")
            .field("fingerprint", &self.fingerprint())
            .field("healthy", &self.local_healthy())
            .finish()
    }
}

fn seconds(config: &Map<String, Value>, name: &'static str) -> Result<Option<Duration>, HealthError> {
    match config.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_f64() {
            Some(secs) if secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            _ => Err(HealthError::InvalidParameter {
                name,
                reason: format!("expected a positive number of seconds, got {}", v),
            }),
        },
    }
}
