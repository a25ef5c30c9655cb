/* src/zone/picker.rs */

use super::{ALIAS, Label, Record};
use crate::geoip::{Location, MAX_DISTANCE};
use crate::health::{HealthCheck, HealthStatus};
use hickory_proto::rr::RecordType;
use rand::Rng;

/// Candidates within this factor of the nearest remaining distance are
/// treated as equally close.
const DISTANCE_BAND: f64 = 1.05;

impl Label {
    /// Selects up to `max` records of `qtype` for an answer: unhealthy
    /// records are dropped, the closest servers are preferred when a client
    /// location is known, and the rest is a weighted draw.
    pub fn picker(
        &self,
        qtype: RecordType,
        max: usize,
        location: Option<&Location>,
        health: &dyn HealthCheck,
    ) -> Vec<&Record> {
        if qtype == RecordType::ANY {
            // Aliases are resolved by the label finder, never served.
            let mut rtypes: Vec<RecordType> = self
                .records
                .keys()
                .copied()
                .filter(|rtype| *rtype != ALIAS)
                .collect();
            rtypes.sort();
            return rtypes
                .into_iter()
                .flat_map(|rtype| self.picker(rtype, max, location, health))
                .collect();
        }

        let Some(records) = self.records.get(&qtype) else {
            return Vec::new();
        };

        let mut servers: Vec<&Record> = records.iter().collect();
        let mut sum = self.weight.get(&qtype).copied().unwrap_or(0);

        if self.test.is_some() {
            servers.retain(|record| match &record.test {
                Some(test) => health.status(test) != HealthStatus::Unhealthy,
                None => true,
            });
            sum = total_weight(&servers);
        }

        // Unweighted sets (NS, SOA, MX without weights, ...) are returned whole.
        if sum == 0 {
            return servers;
        }

        let mut max = max;
        if qtype == RecordType::CNAME || qtype == ALIAS {
            max = 1;
        }
        max = max.min(servers.len());

        if let Some(location) = location {
            if (qtype == RecordType::A || qtype == RecordType::AAAA) && max < servers.len() {
                servers = closest(servers, location, max);
                sum = total_weight(&servers);
            }
        }

        weighted_sample(servers, sum, max)
    }
}

fn total_weight(servers: &[&Record]) -> u64 {
    servers.iter().map(|record| record.weight as u64).sum()
}

/// Keeps the nearest servers: repeatedly admits every remaining server
/// within 5% of the nearest remaining distance until at least `max` are in.
fn closest<'a>(servers: Vec<&'a Record>, location: &Location, max: usize) -> Vec<&'a Record> {
    let distances: Vec<f64> = servers
        .iter()
        .map(|record| {
            record
                .location
                .as_ref()
                .map_or(MAX_DISTANCE, |server| location.distance(server))
        })
        .collect();

    let mut chosen = vec![false; servers.len()];
    let mut count = 0;
    while count < max {
        let nearest = distances
            .iter()
            .zip(&chosen)
            .filter(|(_, chosen)| !**chosen)
            .map(|(distance, _)| *distance)
            .fold(MAX_DISTANCE, f64::min);
        let threshold = nearest * DISTANCE_BAND;
        for (i, distance) in distances.iter().enumerate() {
            if !chosen[i] && *distance <= threshold {
                chosen[i] = true;
                count += 1;
            }
        }
    }

    servers
        .into_iter()
        .zip(chosen)
        .filter_map(|(record, chosen)| chosen.then_some(record))
        .collect()
}

/// Weighted sampling without replacement. The draw is in `1..=sum`, so a
/// zero weight record is only taken once every weighted record is gone;
/// those are then taken in order.
fn weighted_sample(mut servers: Vec<&Record>, mut sum: u64, max: usize) -> Vec<&Record> {
    let mut rng = rand::thread_rng();
    let mut result = Vec::with_capacity(max);

    while result.len() < max && !servers.is_empty() {
        if sum == 0 {
            result.push(servers.remove(0));
            continue;
        }
        let draw = rng.gen_range(1..=sum);
        let mut running = 0u64;
        let index = servers
            .iter()
            .position(|record| {
                running += record.weight as u64;
                running >= draw
            })
            .unwrap_or(servers.len() - 1);
        let picked = servers.remove(index);
        sum -= picked.weight as u64;
        result.push(picked);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthTest, HealthTestParameters, Probe, ProbeOutcome};
    use crate::zone::tests::{a, aaaa};
    use async_trait::async_trait;
    use hickory_proto::rr::rdata::{CNAME, NS};
    use hickory_proto::rr::{Name, RData};
    use std::collections::{HashMap, HashSet};
    use std::net::IpAddr;
    use std::sync::Arc;

    struct NoopProbe;

    #[async_trait]
    impl Probe for NoopProbe {
        async fn test(&self, _ip: Option<IpAddr>) -> ProbeOutcome {
            ProbeOutcome::Up
        }

        fn identity(&self) -> String {
            "noop".to_string()
        }
    }

    /// Health answers from a fixed table keyed by IP; anything else unknown.
    struct Statuses(HashMap<IpAddr, HealthStatus>);

    impl HealthCheck for Statuses {
        fn status(&self, test: &HealthTest) -> HealthStatus {
            test.ip
                .and_then(|ip| self.0.get(&ip).copied())
                .unwrap_or(HealthStatus::Unknown)
        }
    }

    fn no_health() -> Statuses {
        Statuses(HashMap::new())
    }

    fn label(records: Vec<Record>) -> Label {
        let mut label = Label::new("www", 2);
        for record in records {
            let rtype = match record.data {
                RData::AAAA(_) => RecordType::AAAA,
                _ => RecordType::A,
            };
            label.add_record(rtype, record);
        }
        label
    }

    fn at(record: Record, latitude: f64, longitude: f64) -> Record {
        Record {
            location: Some(Location {
                latitude,
                longitude,
                ..Default::default()
            }),
            ..record
        }
    }

    fn tested(record: Record) -> Record {
        let test = HealthTest::new(record.ip(), HealthTestParameters::default(), Arc::new(NoopProbe));
        Record {
            test: Some(test),
            ..record
        }
    }

    fn ips(records: &[&Record]) -> Vec<String> {
        records.iter().map(|r| r.ip().unwrap().to_string()).collect()
    }

    #[test]
    fn missing_type_gives_nothing() {
        let label = label(vec![a("192.0.2.1", 1)]);
        assert!(label.picker(RecordType::MX, 2, None, &no_health()).is_empty());
    }

    #[test]
    fn unweighted_sets_are_returned_whole() {
        let mut label = Label::new("", 1);
        for ns in ["ns1.example.net.", "ns2.example.net.", "ns3.example.net."] {
            let name = Name::from_ascii(ns).unwrap();
            label.add_record(RecordType::NS, Record::new(RData::NS(NS(name)), 0));
        }
        assert_eq!(label.picker(RecordType::NS, 1, None, &no_health()).len(), 3);
    }

    #[test]
    fn weighted_draw_follows_weights() {
        let label = label(vec![a("192.0.2.1", 1000), a("192.0.2.2", 1)]);
        let mut heavy = 0;
        let rounds = 20_000;
        for _ in 0..rounds {
            let picked = label.picker(RecordType::A, 1, None, &no_health());
            assert_eq!(picked.len(), 1);
            if picked[0].ip() == Some("192.0.2.1".parse().unwrap()) {
                heavy += 1;
            }
        }
        let light = rounds - heavy;
        // Expect ~20 light picks out of 20k; allow generous statistical slack.
        assert!(light < 100, "light record picked {} times", light);
        assert!(heavy > rounds - 100);
    }

    #[test]
    fn sampling_is_without_replacement() {
        let label = label(vec![a("192.0.2.1", 5), a("192.0.2.2", 5), a("192.0.2.3", 5)]);
        for _ in 0..200 {
            let picked = label.picker(RecordType::A, 3, None, &no_health());
            let unique: HashSet<String> = ips(&picked).into_iter().collect();
            assert_eq!(unique.len(), 3);
        }
        assert_eq!(label.picker(RecordType::A, 10, None, &no_health()).len(), 3);
    }

    #[test]
    fn zero_weight_records_come_last() {
        let label = label(vec![a("192.0.2.1", 0), a("192.0.2.2", 5)]);
        for _ in 0..200 {
            let picked = label.picker(RecordType::A, 1, None, &no_health());
            assert_eq!(ips(&picked), vec!["192.0.2.2"]);
        }
        let picked = label.picker(RecordType::A, 2, None, &no_health());
        assert_eq!(ips(&picked), vec!["192.0.2.2", "192.0.2.1"]);
    }

    #[test]
    fn cname_answers_are_capped_at_one() {
        let mut label = Label::new("www", 4);
        for target in ["a.example.net.", "b.example.net."] {
            let name = Name::from_ascii(target).unwrap();
            label.add_record(RecordType::CNAME, Record::new(RData::CNAME(CNAME(name)), 1));
        }
        assert_eq!(label.picker(RecordType::CNAME, 4, None, &no_health()).len(), 1);
    }

    #[test]
    fn distance_banding_keeps_near_ties() {
        let client = Location::default();
        // Angular distances from (0, 0): 1, 1.04 and 5 degrees.
        let label = label(vec![
            at(a("192.0.2.1", 1), 0.0, 1.0),
            at(a("192.0.2.2", 1), 0.0, 1.04),
            at(a("192.0.2.3", 1000), 0.0, 5.0),
        ]);

        let banded = closest(label.records[&RecordType::A].iter().collect(), &client, 1);
        assert_eq!(ips(&banded), vec!["192.0.2.1", "192.0.2.2"]);

        for _ in 0..500 {
            let picked = label.picker(RecordType::A, 2, Some(&client), &no_health());
            let mut got = ips(&picked);
            got.sort();
            assert_eq!(got, vec!["192.0.2.1", "192.0.2.2"]);
        }
    }

    #[test]
    fn servers_without_location_are_furthest() {
        let client = Location::default();
        let label = label(vec![
            aaaa("2001:db8::1", 1),
            at(aaaa("2001:db8::2", 1), 10.0, 10.0),
        ]);
        for _ in 0..100 {
            let picked = label.picker(RecordType::AAAA, 1, Some(&client), &no_health());
            assert_eq!(picked[0].ip(), Some("2001:db8::2".parse().unwrap()));
        }
    }

    #[test]
    fn unhealthy_records_are_filtered() {
        let mut label = label(vec![
            tested(a("192.0.2.1", 10)),
            tested(a("192.0.2.2", 10)),
            tested(a("192.0.2.3", 10)),
        ]);
        label.test = Some(HealthTest::new(None, HealthTestParameters::default(), Arc::new(NoopProbe)));

        let health = Statuses(HashMap::from([
            ("192.0.2.1".parse().unwrap(), HealthStatus::Unhealthy),
            ("192.0.2.2".parse().unwrap(), HealthStatus::Healthy),
        ]));
        for _ in 0..200 {
            let picked = label.picker(RecordType::A, 2, None, &health);
            let mut got = ips(&picked);
            got.sort();
            // Unknown status (192.0.2.3) is not a failure.
            assert_eq!(got, vec!["192.0.2.2", "192.0.2.3"]);
        }

        let all_down = Statuses(HashMap::from([
            ("192.0.2.1".parse().unwrap(), HealthStatus::Unhealthy),
            ("192.0.2.2".parse().unwrap(), HealthStatus::Unhealthy),
            ("192.0.2.3".parse().unwrap(), HealthStatus::Unhealthy),
        ]));
        assert!(label.picker(RecordType::A, 2, None, &all_down).is_empty());
    }

    #[test]
    fn any_concatenates_every_type() {
        let label = label(vec![a("192.0.2.1", 1), aaaa("2001:db8::1", 1)]);
        let picked = label.picker(RecordType::ANY, 1, None, &no_health());
        assert_eq!(picked.len(), 2);
    }
}
