/* src/health/probes/ntp.rs */

use super::{Probe, ProbeOutcome, optional_u64};
use crate::error::HealthError;
use async_trait::async_trait;
use fancy_log::{LogLevel, log};
use serde_json::{Map, Value};
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;

const NTP_PORT: u16 = 123;
const NTP_PACKET_LEN: usize = 48;
// LI = 0, VN = 3, Mode = 3 (client)
const CLIENT_HEADER: u8 = 0x1b;
const LEAP_UNSYNCHRONIZED: u8 = 3;

/// Healthy when the server answers with a synchronized, low enough stratum.
#[derive(Debug)]
pub struct NtpProbe {
    port: u16,
    max_stratum: u8,
}

impl NtpProbe {
    pub fn new(config: &Map<String, Value>) -> Result<Self, HealthError> {
        let max_stratum = optional_u64(config, "max_stratum", 4)?;
        let max_stratum = u8::try_from(max_stratum)
            .ok()
            .filter(|s| (1..=15).contains(s))
            .ok_or_else(|| HealthError::InvalidParameter {
                name: "max_stratum",
                reason: format!("{} is outside 1..=15", max_stratum),
            })?;
        let port = optional_u64(config, "port", NTP_PORT as u64)?;
        let port = u16::try_from(port).map_err(|_| HealthError::InvalidParameter {
            name: "port",
            reason: format!("{} is not a valid port", port),
        })?;
        Ok(Self { port, max_stratum })
    }

    fn evaluate(&self, reply: &[u8]) -> bool {
        if reply.len() < NTP_PACKET_LEN {
            return false;
        }
        let leap = reply[0] >> 6;
        let stratum = reply[1];
        leap != LEAP_UNSYNCHRONIZED && stratum >= 1 && stratum <= self.max_stratum
    }
}

#[async_trait]
impl Probe for NtpProbe {
    async fn test(&self, ip: Option<IpAddr>) -> ProbeOutcome {
        let Some(ip) = ip else {
            return ProbeOutcome::Down;
        };
        let bind: SocketAddr = match ip {
            IpAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
            IpAddr::V6(_) => ([0u16; 8], 0).into(),
        };
        let result = async {
            let socket = UdpSocket::bind(bind).await?;
            socket.connect(SocketAddr::new(ip, self.port)).await?;
            let mut request = [0u8; NTP_PACKET_LEN];
            request[0] = CLIENT_HEADER;
            socket.send(&request).await?;
            let mut reply = [0u8; 512];
            let n = socket.recv(&mut reply).await?;
            Ok::<_, std::io::Error>(reply[..n].to_vec())
        }
        .await;

        match result {
            Ok(reply) => self.evaluate(&reply).into(),
            Err(e) => {
                log(LogLevel::Debug, &format!("ntp check {} failed: {}", ip, e));
                ProbeOutcome::Down
            }
        }
    }

    fn identity(&self) -> String {
        format!("ntp/{}/{}", self.port, self.max_stratum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(leap: u8, stratum: u8) -> Vec<u8> {
        let mut packet = vec![0u8; NTP_PACKET_LEN];
        packet[0] = (leap << 6) | 0x24;
        packet[1] = stratum;
        packet
    }

    #[test]
    fn stratum_threshold() {
        let probe = NtpProbe::new(&Map::new()).unwrap();
        assert!(probe.evaluate(&reply(0, 2)));
        assert!(probe.evaluate(&reply(0, 4)));
        assert!(!probe.evaluate(&reply(0, 5)));
        assert!(!probe.evaluate(&reply(0, 0)));
        assert!(!probe.evaluate(&reply(3, 2)));
        assert!(!probe.evaluate(&[0x24, 2]));
    }

    #[tokio::test]
    async fn queries_a_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, NTP_PACKET_LEN);
            assert_eq!(buf[0], CLIENT_HEADER);
            server.send_to(&reply(0, 1), peer).await.unwrap();
        });

        let probe = NtpProbe::new(serde_json::json!({"port": port}).as_object().unwrap()).unwrap();
        assert_eq!(
            probe.test(Some("127.0.0.1".parse().unwrap())).await,
            ProbeOutcome::Up
        );
    }
}
