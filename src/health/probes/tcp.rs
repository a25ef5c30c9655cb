/* src/health/probes/tcp.rs */

use super::{Probe, ProbeOutcome, optional_u64};
use crate::error::HealthError;
use async_trait::async_trait;
use fancy_log::{LogLevel, log};
use serde_json::{Map, Value};
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;

/// Healthy when a TCP connection to `ip:port` can be established.
#[derive(Debug)]
pub struct TcpProbe {
    port: u16,
}

impl TcpProbe {
    pub fn new(config: &Map<String, Value>) -> Result<Self, HealthError> {
        let port = optional_u64(config, "port", 80)?;
        let port = u16::try_from(port).map_err(|_| HealthError::InvalidParameter {
            name: "port",
            reason: format!("{} is not a valid port", port),
        })?;
        Ok(Self { port })
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn test(&self, ip: Option<IpAddr>) -> ProbeOutcome {
        let Some(ip) = ip else {
            return ProbeOutcome::Down;
        };
        let addr = SocketAddr::new(ip, self.port);
        match TcpStream::connect(addr).await {
            Ok(_) => ProbeOutcome::Up,
            Err(e) => {
                log(LogLevel::Debug, &format!("tcp check {} failed: {}", addr, e));
                ProbeOutcome::Down
            }
        }
    }

    fn identity(&self) -> String {
        format!("tcp/{}", self.port)
    }
}
