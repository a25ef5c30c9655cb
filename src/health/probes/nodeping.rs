/* src/health/probes/nodeping.rs */

use super::{Probe, ProbeOutcome, required_str, token_digest};
use crate::error::HealthError;
use async_trait::async_trait;
use fancy_log::{LogLevel, log};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::IpAddr;

const DEFAULT_API: &str = "https://api.nodeping.com/api/1";

#[derive(Debug, Deserialize)]
struct Check {
    #[serde(default)]
    parameters: CheckParameters,
    /// 1 when passing, 0 when failing.
    state: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct CheckParameters {
    #[serde(default)]
    target: String,
}

/// Global probe polling NodePing. Only failing checks carry information,
/// so hosts start out healthy.
#[derive(Debug)]
pub struct NodepingProbe {
    api: String,
    token: String,
    client: reqwest::Client,
}

impl NodepingProbe {
    pub fn new(config: &Map<String, Value>) -> Result<Self, HealthError> {
        let token = required_str(config, "token")?.to_string();
        let api = config
            .get("api")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_API)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            api,
            token,
            client: reqwest::Client::new(),
        })
    }

    async fn fetch(&self) -> Result<HashMap<String, Check>, reqwest::Error> {
        self.client
            .get(format!("{}/checks", self.api))
            .query(&[("token", self.token.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

fn hosts_from_checks(checks: HashMap<String, Check>) -> HashMap<String, bool> {
    let mut hosts = HashMap::new();
    for check in checks.into_values() {
        if check.parameters.target.is_empty() {
            continue;
        }
        let up = check.state != Some(0);
        // Any failing check on a host marks it down.
        let entry = hosts.entry(check.parameters.target).or_insert(true);
        *entry = *entry && up;
    }
    hosts
}

#[async_trait]
impl Probe for NodepingProbe {
    async fn test(&self, _ip: Option<IpAddr>) -> ProbeOutcome {
        match self.fetch().await {
            Ok(checks) => ProbeOutcome::Hosts(hosts_from_checks(checks)),
            Err(e) => {
                log(LogLevel::Debug, &format!("nodeping poll failed: {}", e));
                ProbeOutcome::Down
            }
        }
    }

    fn identity(&self) -> String {
        format!("nodeping/{}/{}", self.api, token_digest(&self.token))
    }

    fn is_global(&self) -> bool {
        true
    }

    fn healthy_initially(&self) -> bool {
        true
    }
}
