/* src/health/probes/pingdom.rs */

use super::{Probe, ProbeOutcome, required_str, token_digest};
use crate::error::HealthError;
use async_trait::async_trait;
use fancy_log::{LogLevel, log};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::IpAddr;

const DEFAULT_API: &str = "https://api.pingdom.com/api/3.1";

#[derive(Debug, Deserialize)]
struct ChecksResponse {
    #[serde(default)]
    checks: Vec<Check>,
}

#[derive(Debug, Deserialize)]
struct Check {
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    status: String,
}

/// Global probe polling the Pingdom checks API. Only `down` is treated as
/// a failure, paused and unknown checks leave hosts healthy.
#[derive(Debug)]
pub struct PingdomProbe {
    api: String,
    token: String,
    client: reqwest::Client,
}

impl PingdomProbe {
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

    async fn fetch(&self) -> Result<ChecksResponse, reqwest::Error> {
        self.client
            .get(format!("{}/checks", self.api))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

fn hosts_from_checks(response: ChecksResponse) -> HashMap<String, bool> {
    let mut hosts = HashMap::new();
    for check in response.checks {
        if check.hostname.is_empty() {
            continue;
        }
        let up = check.status != "down";
        let entry = hosts.entry(check.hostname).or_insert(true);
        *entry = *entry && up;
    }
    hosts
}

#[async_trait]
impl Probe for PingdomProbe {
    async fn test(&self, _ip: Option<IpAddr>) -> ProbeOutcome {
        match self.fetch().await {
            Ok(response) => ProbeOutcome::Hosts(hosts_from_checks(response)),
            Err(e) => {
                log(LogLevel::Debug, &format!("pingdom poll failed: {}", e));
                ProbeOutcome::Down
            }
        }
    }

    fn identity(&self) -> String {
        format!("pingdom/{}/{}", self.api, token_digest(&self.token))
    }

    fn is_global(&self) -> bool {
        true
    }

    fn healthy_initially(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_down_checks_fail() {
        let response: ChecksResponse = serde_json::from_value(json!({
            "checks": [
                {"hostname": "192.0.2.1", "status": "up"},
                {"hostname": "192.0.2.2", "status": "down"},
                {"hostname": "192.0.2.3", "status": "paused"},
                {"hostname": "192.0.2.4", "status": "unknown"},
                {"status": "down"}
            ]
        }))
        .unwrap();
        let hosts = hosts_from_checks(response);
        assert_eq!(hosts.len(), 4);
        assert!(hosts["192.0.2.1"]);
        assert!(!hosts["192.0.2.2"]);
        assert!(hosts["192.0.2.3"]);
        assert!(hosts["192.0.2.4"]);
    }

    #[test]
    fn accounts_sharing_a_token_prefix_stay_distinct() {
        let one = PingdomProbe::new(json!({"token": "ABCDEF-one"}).as_object().unwrap()).unwrap();
        let two = PingdomProbe::new(json!({"token": "ABCDEF-two"}).as_object().unwrap()).unwrap();
        assert_ne!(one.identity(), two.identity());
        assert!(!one.identity().contains("ABCDEF"));
        assert!(one.is_global());
        assert!(one.healthy_initially());
    }
}
