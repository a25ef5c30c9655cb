/* src/health/probes/mod.rs */

mod exec;
mod file;
mod nodeping;
mod ntp;
mod pingdom;
mod tcp;

pub use exec::ExecProbe;
pub use file::FileProbe;
pub use nodeping::NodepingProbe;
pub use ntp::NtpProbe;
pub use pingdom::PingdomProbe;
pub use tcp::TcpProbe;

use crate::error::HealthError;
use async_trait::async_trait;
use ring::digest::{SHA256, digest};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Result of one probe invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Up,
    Down,
    /// A global probe answered; health for every IP it knows about.
    Hosts(HashMap<String, bool>),
}

impl From<bool> for ProbeOutcome {
    fn from(up: bool) -> Self {
        if up { Self::Up } else { Self::Down }
    }
}

/// A pluggable liveness check. Implementations must bound their own I/O;
/// the scheduler additionally wraps every call in the test's timeout.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn test(&self, ip: Option<IpAddr>) -> ProbeOutcome;

    /// Stable description of the probe configuration, part of the fingerprint.
    fn identity(&self) -> String;

    fn is_global(&self) -> bool {
        false
    }

    /// Probes that can only observe failures start out healthy.
    fn healthy_initially(&self) -> bool {
        false
    }
}

/// Constructs the probe registered under `kind`.
pub fn build(kind: &str, config: &Map<String, Value>) -> Result<Arc<dyn Probe>, HealthError> {
    let probe: Arc<dyn Probe> = match kind {
        "tcp" => Arc::new(TcpProbe::new(config)?),
        "ntp" => Arc::new(NtpProbe::new(config)?),
        "exec" => Arc::new(ExecProbe::new(config)?),
        "file" => Arc::new(FileProbe::new(config)?),
        "nodeping" => Arc::new(NodepingProbe::new(config)?),
        "pingdom" => Arc::new(PingdomProbe::new(config)?),
        other => return Err(HealthError::UnknownType(other.to_string())),
    };
    Ok(probe)
}

fn required_str<'a>(config: &'a Map<String, Value>, name: &'static str) -> Result<&'a str, HealthError> {
    match config.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(other) => Err(HealthError::InvalidParameter {
            name,
            reason: format!("expected a non-empty string, got {}", other),
        }),
        None => Err(HealthError::MissingParameter(name)),
    }
}

/// Hex SHA-256 of an API token, so accounts can be told apart in a
/// fingerprint without the token itself appearing in it.
fn token_digest(token: &str) -> String {
    digest(&SHA256, token.as_bytes())
        .as_ref()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

fn optional_u64(config: &Map<String, Value>, name: &'static str, default: u64) -> Result<u64, HealthError> {
    match config.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_u64().ok_or_else(|| HealthError::InvalidParameter {
            name,
            reason: format!("expected a non-negative integer, got {}", v),
        }),
    }
}
