/* src/zone/mod.rs */

//! In-memory zones: labels, their typed record sets and per-zone metrics.

mod find;
mod metrics;
mod parser;
mod picker;
mod store;

pub use find::{LabelMatch, MAX_ALIAS_DEPTH};
pub use metrics::ZoneMetrics;
pub use parser::{parse_zone, zone_origin};
pub use store::{ZoneMap, ZoneStore};

use crate::geoip::{GeoProvider, Location};
use crate::health::{HealthTest, HealthTestRunner};
use crate::targeting::TargetOptions;
use hickory_proto::rr::{Name, RData, RecordType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The non-standard alias record type (MF), which makes the resolver look
/// up another label of the same zone.
pub const ALIAS: RecordType = RecordType::Unknown(4);

static ZONE_INSTANCES: AtomicU64 = AtomicU64::new(1);

/// One resource record value plus its selection metadata.
#[derive(Debug, Clone)]
pub struct Record {
    pub data: RData,
    /// 0 means unweighted.
    pub weight: u32,
    /// Server position, for closest-server selection.
    pub location: Option<Location>,
    pub test: Option<HealthTest>,
}

impl Record {
    pub fn new(data: RData, weight: u32) -> Self {
        Self {
            data,
            weight,
            location: None,
            test: None,
        }
    }

    /// An alias pointing at another label of the same zone.
    pub fn alias(target: &str) -> Self {
        let name = Name::from_ascii(target).unwrap_or_else(|_| Name::root());
        Self::new(RData::CNAME(hickory_proto::rr::rdata::CNAME(name)), 0)
    }

    /// Address of A and AAAA records.
    pub fn ip(&self) -> Option<IpAddr> {
        match &self.data {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        }
    }

    /// Label name an alias record points at, relative to the zone origin.
    pub fn alias_target(&self) -> Option<String> {
        match &self.data {
            RData::CNAME(cname) => {
                let name = cname.0.to_ascii().to_lowercase();
                Some(name.trim_end_matches('.').to_string())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub max_hosts: usize,
    /// 0 inherits the zone TTL.
    pub ttl: u32,
    pub records: HashMap<RecordType, Vec<Record>>,
    /// Summed in 64 bits so any number of `u32` weights fits.
    pub weight: HashMap<RecordType, u64>,
    pub closest: bool,
    pub test: Option<HealthTest>,
}

impl Label {
    pub fn new(name: &str, max_hosts: usize) -> Self {
        Self {
            name: name.to_string(),
            max_hosts,
            ttl: 0,
            records: HashMap::new(),
            weight: HashMap::new(),
            closest: false,
            test: None,
        }
    }

    pub fn add_record(&mut self, rtype: RecordType, record: Record) {
        *self.weight.entry(rtype).or_default() += u64::from(record.weight);
        self.records.entry(rtype).or_default().push(record);
    }

    pub fn first(&self, rtype: RecordType) -> Option<&Record> {
        self.records.get(&rtype).and_then(|records| records.first())
    }

    pub fn has_records(&self, rtype: RecordType) -> bool {
        self.records.get(&rtype).is_some_and(|records| !records.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ZoneOptions {
    pub serial: u32,
    pub ttl: u32,
    pub max_hosts: usize,
    pub contact: String,
    pub targeting: TargetOptions,
    pub closest: bool,
}

impl Default for ZoneOptions {
    fn default() -> Self {
        Self {
            serial: 1,
            ttl: 120,
            max_hosts: 2,
            contact: "hostmaster".to_string(),
            targeting: TargetOptions::GLOBAL | TargetOptions::COUNTRY | TargetOptions::CONTINENT,
            closest: false,
        }
    }
}

/// A DNS origin and everything served below it.
#[derive(Debug)]
pub struct Zone {
    pub origin: String,
    pub labels: HashMap<String, Label>,
    pub options: ZoneOptions,
    pub metrics: Arc<ZoneMetrics>,
    instance: u64,
    health_wired: Mutex<bool>,
}

impl Zone {
    pub fn new(origin: &str, options: ZoneOptions) -> Self {
        let origin = origin.trim_end_matches('.').to_lowercase();
        let mut labels = HashMap::new();
        labels.insert(String::new(), Label::new("", options.max_hosts));
        Self {
            origin,
            labels,
            options,
            metrics: Arc::new(ZoneMetrics::default()),
            instance: ZONE_INSTANCES.fetch_add(1, Ordering::Relaxed),
            health_wired: Mutex::new(false),
        }
    }

    /// The label called `name`, created with zone defaults if missing.
    pub fn label_mut(&mut self, name: &str) -> &mut Label {
        let max_hosts = self.options.max_hosts;
        self.labels
            .entry(name.to_lowercase())
            .or_insert_with(|| Label::new(&name.to_lowercase(), max_hosts))
    }

    pub fn has_closest(&self) -> bool {
        self.options.closest || self.labels.values().any(|label| label.closest)
    }

    /// Keeps the counters of the zone this one replaces.
    pub fn adopt_metrics(&mut self, previous: &Zone) {
        self.metrics = previous.metrics.clone();
    }

    /// Looks up a position for every address record in closest labels.
    pub async fn resolve_locations(&mut self, geo: &dyn GeoProvider) {
        let closest_zone = self.options.closest;
        for label in self.labels.values_mut() {
            if !(closest_zone || label.closest) {
                continue;
            }
            for rtype in [RecordType::A, RecordType::AAAA] {
                let Some(records) = label.records.get_mut(&rtype) else {
                    continue;
                };
                for record in records.iter_mut() {
                    if let Some(ip) = record.ip() {
                        record.location = geo.location(ip).await;
                    }
                }
            }
        }
    }

    fn reference_key(&self, label: &str) -> String {
        format!("{}#{}/{}", self.origin, self.instance, label)
    }

    fn health_tests(&self) -> impl Iterator<Item = (&Label, &Record, &HealthTest)> {
        self.labels.values().flat_map(|label| {
            label.records.values().flatten().filter_map(move |record| {
                record.test.as_ref().map(|test| (label, record, test))
            })
        })
    }

    /// Registers every record health test with the runner. Records that
    /// existed in `previous` (same label, same address) start from the
    /// health the previous zone last saw.
    pub fn start_health_tests(&self, runner: &HealthTestRunner, previous: Option<&Zone>) {
        let mut wired = self.health_wired.lock();
        if *wired {
            return;
        }
        for (label, record, test) in self.health_tests() {
            if let Some(old) = previous.and_then(|zone| zone.find_equivalent_test(label, record)) {
                test.set_local_healthy(runner.is_healthy(old));
            }
            runner.add_reference(test, &self.reference_key(&label.name));
        }
        *wired = true;
    }

    fn find_equivalent_test(&self, label: &Label, record: &Record) -> Option<&HealthTest> {
        let ip = record.ip()?;
        self.labels
            .get(&label.name)?
            .records
            .values()
            .flatten()
            .find(|old| old.ip() == Some(ip))
            .and_then(|old| old.test.as_ref())
    }

    /// Releases this zone's health test references. Safe to call twice.
    pub async fn close(&self, runner: &HealthTestRunner) {
        {
            let mut wired = self.health_wired.lock();
            if !*wired {
                return;
            }
            *wired = false;
        }
        for (label, _, test) in self.health_tests() {
            runner
                .remove_reference(test, &self.reference_key(&label.name))
                .await;
        }
    }
}
