/* src/targeting.rs */

use crate::error::TargetingError;
use crate::geoip::{GeoProvider, Location};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Which targeting dimensions a zone answers by. A small bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TargetOptions(u8);

impl TargetOptions {
    pub const GLOBAL: Self = Self(1);
    pub const CONTINENT: Self = Self(1 << 1);
    pub const COUNTRY: Self = Self(1 << 2);
    pub const REGION_GROUP: Self = Self(1 << 3);
    pub const REGION: Self = Self(1 << 4);
    pub const ASN: Self = Self(1 << 5);
    pub const IP: Self = Self(1 << 6);

    const KEYWORDS: [(&'static str, TargetOptions); 7] = [
        ("@", Self::GLOBAL),
        ("continent", Self::CONTINENT),
        ("country", Self::COUNTRY),
        ("regiongroup", Self::REGION_GROUP),
        ("region", Self::REGION),
        ("asn", Self::ASN),
        ("ip", Self::IP),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Builds the ordered target list for a client, most specific first:
    /// IP buckets, region, region group, country, continent, ASN, global.
    pub async fn get_targets(
        &self,
        ip: IpAddr,
        has_closest: bool,
        geo: &dyn GeoProvider,
    ) -> (Vec<String>, u8, Option<Location>) {
        let mut targets = Vec::new();
        let mut netmask = 0;
        let mut location = None;

        if self.contains(Self::IP) {
            targets.extend(ip_targets(ip));
        }

        if (self.intersects(Self::REGION | Self::REGION_GROUP) || has_closest) && geo.has_location() {
            location = geo.location(ip).await;
            if let Some(loc) = &location {
                if self.contains(Self::REGION) && !loc.region.is_empty() {
                    targets.push(loc.region.clone());
                }
                if self.contains(Self::REGION_GROUP) && !loc.region_group.is_empty() {
                    targets.push(loc.region_group.clone());
                }
                if self.contains(Self::COUNTRY) && !loc.country.is_empty() {
                    targets.push(loc.country.clone());
                }
                if self.contains(Self::CONTINENT) && !loc.continent.is_empty() {
                    targets.push(loc.continent.clone());
                }
            }
        } else if self.intersects(Self::COUNTRY | Self::CONTINENT) && geo.has_country() {
            if let Some((country, continent, mask)) = geo.country(ip).await {
                netmask = mask;
                if self.contains(Self::COUNTRY) && !country.is_empty() {
                    targets.push(country);
                }
                if self.contains(Self::CONTINENT) && !continent.is_empty() {
                    targets.push(continent);
                }
            }
        }

        if self.contains(Self::ASN) && geo.has_asn() {
            if let Some((asn, mask)) = geo.asn(ip).await {
                if netmask == 0 || mask < netmask {
                    netmask = mask;
                }
                targets.push(asn);
            }
        }

        if self.contains(Self::GLOBAL) {
            targets.push("@".to_string());
        }

        (targets, netmask, location)
    }
}

/// `[ip]` followed by the containing /24 (IPv4) or /48 (IPv6) bucket.
fn ip_targets(ip: IpAddr) -> Vec<String> {
    let mut targets = vec![format!("[{}]", ip)];
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            if octets[3] != 0 {
                let net = std::net::Ipv4Addr::new(octets[0], octets[1], octets[2], 0);
                targets.push(format!("[{}]", net));
            }
        }
        IpAddr::V6(v6) => {
            let mut segments = v6.segments();
            for segment in segments.iter_mut().skip(3) {
                *segment = 0;
            }
            targets.push(format!("[{}]", std::net::Ipv6Addr::from(segments)));
        }
    }
    targets
}

impl std::ops::BitOr for TargetOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl FromStr for TargetOptions {
    type Err = TargetingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = Self::empty();
        for word in s.split_whitespace() {
            let keyword = word.to_lowercase();
            let flag = Self::KEYWORDS
                .iter()
                .find(|(name, _)| *name == keyword)
                .map(|(_, flag)| *flag)
                .ok_or_else(|| TargetingError::UnknownOption(word.to_string()))?;
            options.insert(flag);
        }
        Ok(options)
    }
}

impl fmt::Display for TargetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::KEYWORDS
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        f.write_str(&names.join(" "))
    }
}
