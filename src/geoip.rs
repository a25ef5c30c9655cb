/* src/geoip.rs */

use async_trait::async_trait;
use fancy_log::{LogLevel, log};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{Duration, sleep, timeout};

/// Angular distance (degrees) used when a candidate has no known position.
pub const MAX_DISTANCE: f64 = 360.0;

const LOOKUP_TIMEOUT: Duration = Duration::from_millis(500);

/// Where a client (or a server) is, as far as the GeoIP data knows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub country: String,
    pub continent: String,
    pub region_group: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Great-circle angular distance to `other`, in degrees.
    pub fn distance(&self, other: &Location) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();
        c.to_degrees()
    }
}

/// Country-level answer: (country, continent, netmask).
pub type CountryInfo = (String, String, u8);

/// Maps client addresses to geographic and network buckets.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn country(&self, ip: IpAddr) -> Option<CountryInfo>;
    async fn asn(&self, ip: IpAddr) -> Option<(String, u8)>;
    async fn location(&self, ip: IpAddr) -> Option<Location>;

    fn has_country(&self) -> bool;
    fn has_asn(&self) -> bool;
    fn has_location(&self) -> bool;
}

static CONTINENTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("af", "africa"),
        ("an", "antarctica"),
        ("as", "asia"),
        ("eu", "europe"),
        ("na", "north-america"),
        ("oc", "oceania"),
        ("sa", "south-america"),
    ])
});

static US_REGION_GROUPS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut groups = HashMap::new();
    let east = [
        "al", "ct", "dc", "de", "fl", "ga", "in", "ky", "ma", "md", "me", "mi", "nc", "nh", "nj",
        "ny", "oh", "pa", "ri", "sc", "tn", "va", "vt", "wv",
    ];
    let central = [
        "ar", "ia", "il", "ks", "la", "mn", "mo", "ms", "nd", "ne", "ok", "sd", "tx", "wi",
    ];
    let west = [
        "ak", "az", "ca", "co", "hi", "id", "mt", "nm", "nv", "or", "ut", "wa", "wy",
    ];
    for state in east {
        groups.insert(state, "us-east");
    }
    for state in central {
        groups.insert(state, "us-central");
    }
    for state in west {
        groups.insert(state, "us-west");
    }
    groups
});

/// Converts a two letter continent code into the name used in zone targets.
pub fn continent_name(code: &str) -> Option<&'static str> {
    CONTINENTS.get(code.to_lowercase().as_str()).copied()
}

/// Region group for a `<country>-<subdivision>` region, when one is defined.
pub fn region_group(country: &str, subdivision: &str) -> Option<&'static str> {
    match country {
        "us" => US_REGION_GROUPS.get(subdivision).copied(),
        _ => None,
    }
}

fn get_socket_path() -> String {
    env::var("GEOIP_SOCKET_PATH").unwrap_or_else(|_| "/tmp/lazy-mmdb/lazy-mmdb.sock".to_string())
}

#[derive(Debug, Deserialize, Default)]
struct IsoCode {
    #[serde(default)]
    iso_code: String,
}

#[derive(Debug, Deserialize, Default)]
struct ContinentCode {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct CityResponse {
    #[serde(default)]
    country: IsoCode,
    #[serde(default)]
    continent: ContinentCode,
    #[serde(default)]
    subdivisions: Vec<IsoCode>,
    location: Option<Coordinates>,
    network: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsnResponse {
    autonomous_system_number: Option<u32>,
    network: Option<String>,
}

fn prefix_len(network: Option<&str>) -> u8 {
    network
        .and_then(|n| n.split_once('/'))
        .and_then(|(_, len)| len.parse().ok())
        .unwrap_or(0)
}

/// GeoIP lookups against a local lazy-mmdb service over its Unix socket.
pub struct GeoIpClient {
    is_available: Arc<AtomicBool>,
}

impl Default for GeoIpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoIpClient {
    pub fn new() -> Self {
        Self {
            is_available: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start_reconnect_task(&self) {
        let is_available = self.is_available.clone();
        tokio::spawn(async move {
            let reconnect_secs: u64 = env::var("GEOIP_RECONNECT_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300);
            let check_interval = Duration::from_secs(reconnect_secs);
            let socket_path = get_socket_path();

            loop {
                let was_available = is_available.load(Ordering::Relaxed);
                match UnixStream::connect(&socket_path).await {
                    Ok(_) => {
                        if !was_available {
                            log(
                                LogLevel::Info,
                                "GeoIP service is available (connected to lazy-mmdb successfully).",
                            );
                            is_available.store(true, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        if was_available {
                            log(
                                LogLevel::Warn,
                                "GeoIP service has become unavailable (connection lost).",
                            );
                            is_available.store(false, Ordering::Relaxed);
                        } else {
                            log(
                                LogLevel::Warn,
                                &format!(
                                    "GeoIP service is unavailable (failed to connect: {}). Retrying in {:?}...",
                                    e, check_interval
                                ),
                            );
                        }
                    }
                }

                sleep(check_interval).await;
            }
        });
    }

    async fn query<T: DeserializeOwned>(&self, path: &str, ip: IpAddr) -> Option<T> {
        if !self.is_available.load(Ordering::Relaxed) {
            return None;
        }

        let socket_path = get_socket_path();
        let mut stream = match UnixStream::connect(&socket_path).await {
            Ok(s) => s,
            Err(_) => {
                if self.is_available.swap(false, Ordering::Relaxed) {
                    log(
                        LogLevel::Warn,
                        "Failed a lookup connection to lazy-mmdb. Marking as unavailable.",
                    );
                }
                return None;
            }
        };

        let request = format!(
            "GET /lookup/{}?ip={} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path, ip
        );

        if stream.write_all(request.as_bytes()).await.is_err() || stream.flush().await.is_err() {
            return None;
        }

        let mut response_buf = Vec::with_capacity(2048);
        match timeout(LOOKUP_TIMEOUT, stream.read_to_end(&mut response_buf)).await {
            Ok(Ok(_)) => {}
            _ => return None,
        }

        let response = String::from_utf8_lossy(&response_buf);
        let body = response.split("\r\n\r\n").nth(1)?;
        serde_json::from_str::<T>(body.trim_end_matches('\0')).ok()
    }
}

#[async_trait]
impl GeoProvider for GeoIpClient {
    async fn country(&self, ip: IpAddr) -> Option<CountryInfo> {
        let city: CityResponse = self.query("country", ip).await?;
        if city.country.iso_code.is_empty() {
            return None;
        }
        let continent = continent_name(&city.continent.code).unwrap_or_default();
        Some((
            city.country.iso_code.to_lowercase(),
            continent.to_string(),
            prefix_len(city.network.as_deref()),
        ))
    }

    async fn asn(&self, ip: IpAddr) -> Option<(String, u8)> {
        let asn: AsnResponse = self.query("asn", ip).await?;
        let number = asn.autonomous_system_number?;
        Some((format!("as{}", number), prefix_len(asn.network.as_deref())))
    }

    async fn location(&self, ip: IpAddr) -> Option<Location> {
        let city: CityResponse = self.query("city", ip).await?;
        let country = city.country.iso_code.to_lowercase();
        let mut location = Location {
            continent: continent_name(&city.continent.code)
                .unwrap_or_default()
                .to_string(),
            ..Default::default()
        };
        if let Some(subdivision) = city.subdivisions.first() {
            let subdivision = subdivision.iso_code.to_lowercase();
            if !country.is_empty() && !subdivision.is_empty() {
                location.region = format!("{}-{}", country, subdivision);
                if let Some(group) = region_group(&country, &subdivision) {
                    location.region_group = group.to_string();
                }
            }
        }
        if let Some(coordinates) = city.location {
            location.latitude = coordinates.latitude;
            location.longitude = coordinates.longitude;
        }
        location.country = country;
        Some(location)
    }

    fn has_country(&self) -> bool {
        self.is_available.load(Ordering::Relaxed)
    }

    fn has_asn(&self) -> bool {
        self.is_available.load(Ordering::Relaxed)
    }

    fn has_location(&self) -> bool {
        self.is_available.load(Ordering::Relaxed)
    }
}

/// A provider with no database loaded; every lookup misses.
pub struct NoGeo;

#[async_trait]
impl GeoProvider for NoGeo {
    async fn country(&self, _ip: IpAddr) -> Option<CountryInfo> {
        None
    }

    async fn asn(&self, _ip: IpAddr) -> Option<(String, u8)> {
        None
    }

    async fn location(&self, _ip: IpAddr) -> Option<Location> {
        None
    }

    fn has_country(&self) -> bool {
        false
    }

    fn has_asn(&self) -> bool {
        false
    }

    fn has_location(&self) -> bool {
        false
    }
}

/// Fixed, in-memory answers keyed by address. Handy for tests and for
/// pinning well known resolvers to a location.
#[derive(Default)]
pub struct StaticGeo {
    locations: HashMap<IpAddr, Location>,
    asns: HashMap<IpAddr, String>,
}

impl StaticGeo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, ip: IpAddr, location: Location) -> Self {
        self.locations.insert(ip, location);
        self
    }

    pub fn with_asn(mut self, ip: IpAddr, asn: &str) -> Self {
        self.asns.insert(ip, asn.to_string());
        self
    }
}

#[async_trait]
impl GeoProvider for StaticGeo {
    async fn country(&self, ip: IpAddr) -> Option<CountryInfo> {
        self.locations
            .get(&ip)
            .map(|l| (l.country.clone(), l.continent.clone(), 24))
    }

    async fn asn(&self, ip: IpAddr) -> Option<(String, u8)> {
        self.asns.get(&ip).map(|asn| (asn.clone(), 24))
    }

    async fn location(&self, ip: IpAddr) -> Option<Location> {
        self.locations.get(&ip).cloned()
    }

    fn has_country(&self) -> bool {
        true
    }

    fn has_asn(&self) -> bool {
        true
    }

    fn has_location(&self) -> bool {
        true
    }
}
