/* src/health/probes/file.rs */

use super::{Probe, ProbeOutcome, required_str};
use crate::error::HealthError;
use async_trait::async_trait;
use fancy_log::{LogLevel, log};
use parking_lot::Mutex;
use ring::digest;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// Global probe reading a JSON document of `ip -> status`. A status is a
/// boolean, a number (non-zero is healthy) or an object with `healthy`.
#[derive(Debug)]
pub struct FileProbe {
    path: PathBuf,
    last: Mutex<Option<(Vec<u8>, HashMap<String, bool>)>>,
}

impl FileProbe {
    pub fn new(config: &Map<String, Value>) -> Result<Self, HealthError> {
        let path = PathBuf::from(required_str(config, "path")?);
        Ok(Self {
            path,
            last: Mutex::new(None),
        })
    }

    fn parse(&self, contents: &[u8]) -> Option<HashMap<String, bool>> {
        let document: Map<String, Value> = match serde_json::from_slice(contents) {
            Ok(doc) => doc,
            Err(e) => {
                log(
                    LogLevel::Warn,
                    &format!("health file {} is not valid JSON: {}", self.path.display(), e),
                );
                return None;
            }
        };

        let mut hosts = HashMap::with_capacity(document.len());
        for (ip, status) in document {
            let healthy = match &status {
                Value::Bool(b) => Some(*b),
                Value::Number(n) => n.as_f64().map(|n| n != 0.0),
                Value::Object(o) => o.get("healthy").and_then(Value::as_bool),
                _ => None,
            };
            match healthy {
                Some(healthy) => {
                    hosts.insert(ip, healthy);
                }
                None => log(
                    LogLevel::Debug,
                    &format!(
                        "health file {}: ignoring status {} for {}",
                        self.path.display(),
                        status,
                        ip
                    ),
                ),
            }
        }
        Some(hosts)
    }
}

#[async_trait]
impl Probe for FileProbe {
    async fn test(&self, _ip: Option<IpAddr>) -> ProbeOutcome {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) => {
                log(
                    LogLevel::Debug,
                    &format!("health file {} unreadable: {}", self.path.display(), e),
                );
                return ProbeOutcome::Down;
            }
        };

        let hash = digest::digest(&digest::SHA256, &contents).as_ref().to_vec();
        if let Some((last_hash, hosts)) = self.last.lock().as_ref() {
            if *last_hash == hash {
                return ProbeOutcome::Hosts(hosts.clone());
            }
        }

        match self.parse(&contents) {
            Some(hosts) => {
                *self.last.lock() = Some((hash, hosts.clone()));
                ProbeOutcome::Hosts(hosts)
            }
            None => ProbeOutcome::Down,
        }
    }

    fn identity(&self) -> String {
        format!("file/{}", self.path.display())
    }

    fn is_global(&self) -> bool {
        true
    }
}
