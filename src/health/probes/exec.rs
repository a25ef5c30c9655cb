/* src/health/probes/exec.rs */

use super::{Probe, ProbeOutcome, required_str};
use crate::error::HealthError;
use async_trait::async_trait;
use fancy_log::{LogLevel, log};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::process::Stdio;
use tokio::process::Command;

/// Runs an external command; exit status 0 means healthy. Every `%s` in
/// the command is replaced by the target IP.
#[derive(Debug)]
pub struct ExecProbe {
    command: Vec<String>,
}

impl ExecProbe {
    pub fn new(config: &Map<String, Value>) -> Result<Self, HealthError> {
        let command: Vec<String> = required_str(config, "cmd")?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Ok(Self { command })
    }

    fn argv(&self, ip: Option<IpAddr>) -> Vec<String> {
        let ip = ip.map(|ip| ip.to_string()).unwrap_or_default();
        self.command.iter().map(|arg| arg.replace("%s", &ip)).collect()
    }
}

#[async_trait]
impl Probe for ExecProbe {
    async fn test(&self, ip: Option<IpAddr>) -> ProbeOutcome {
        let argv = self.argv(ip);
        let Some((program, args)) = argv.split_first() else {
            return ProbeOutcome::Down;
        };
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        match status {
            Ok(status) => status.success().into(),
            Err(e) => {
                log(LogLevel::Debug, &format!("exec check '{}' failed: {}", program, e));
                ProbeOutcome::Down
            }
        }
    }

    fn identity(&self) -> String {
        format!("exec/{}", self.command.join(" "))
    }
}
