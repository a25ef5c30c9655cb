/* src/status.rs */

//! The built-in `lazy-geodns` zone, answering server diagnostics over TXT.

use crate::geoip::Location;
use crate::zone::{Zone, ZoneOptions};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::net::IpAddr;

pub const STATUS_ZONE: &str = "lazy-geodns";
pub const STATUS_LABEL: &str = "_status";
pub const COUNTRY_LABEL: &str = "_country";

/// An empty zone holding the two diagnostic labels. Answers for them are
/// built per query by the resolver.
pub fn status_zone() -> Zone {
    let options = ZoneOptions {
        ttl: 1,
        max_hosts: 1,
        ..ZoneOptions::default()
    };
    let mut zone = Zone::new(STATUS_ZONE, options);
    zone.label_mut(STATUS_LABEL);
    zone.label_mut(COUNTRY_LABEL);
    zone
}

pub struct ServerStatus {
    started: DateTime<Utc>,
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStatus {
    pub fn new() -> Self {
        Self {
            started: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started).num_seconds()
    }

    pub fn status_txt(&self, zones: usize, health_tests: usize) -> String {
        json!({
            "v": env!("CARGO_PKG_VERSION"),
            "started": self.started.to_rfc3339(),
            "up": self.uptime_seconds(),
            "zones": zones,
            "health_tests": health_tests,
        })
        .to_string()
    }
}

/// What the server makes of a client: its address, target list and, when
/// known, its location.
pub fn country_txt(ip: IpAddr, targets: &[String], location: Option<&Location>) -> String {
    let mut value = json!({
        "ip": ip.to_string(),
        "targets": targets,
    });
    if let Some(loc) = location {
        value["location"] = json!({
            "country": loc.country,
            "continent": loc.continent,
            "region": loc.region,
            "region_group": loc.region_group,
            "lat": loc.latitude,
            "lon": loc.longitude,
        });
    }
    value.to_string()
}
