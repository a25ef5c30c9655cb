/* src/zone/parser.rs */

use super::{ALIAS, Label, Record, Zone, ZoneOptions};
use crate::error::ZoneError;
use crate::health::HealthTest;
use crate::records::{AddressEntry, LabelData, ZoneFile};
use hickory_proto::rr::rdata::{A, AAAA, CNAME, MX, NS, PTR, SOA, SRV, TXT};
use hickory_proto::rr::{Name, RData, RecordType};
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

const SOA_REFRESH: i32 = 5400;
const SOA_RETRY: i32 = 5400;
const SOA_EXPIRE: i32 = 1_209_600;
const SOA_MINIMUM: u32 = 600;

/// The origin a zone file serves, taken from its `<origin>.json` name.
pub fn zone_origin(path: &Path) -> Result<String, ZoneError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_lowercase)
        .ok_or_else(|| ZoneError::MissingOrigin(path.to_path_buf()))
}

/// Builds a zone from its JSON definition. `defaults` supplies the TTL and
/// answer count for anything the file leaves out.
pub fn parse_zone(origin: &str, json: &[u8], defaults: &ZoneOptions) -> Result<Zone, ZoneError> {
    let file: ZoneFile = serde_json::from_slice(json)?;

    let mut options = defaults.clone();
    if let Some(serial) = file.serial {
        options.serial = serial;
    }
    if let Some(ttl) = file.ttl {
        options.ttl = ttl;
    }
    if let Some(max_hosts) = file.max_hosts {
        options.max_hosts = max_hosts;
    }
    if let Some(contact) = file.contact {
        options.contact = contact;
    }
    if let Some(targeting) = file.targeting {
        options.targeting = targeting.parse()?;
    }
    options.closest = file.closest;

    let mut zone = Zone::new(origin, options);
    let origin = zone.origin.clone();

    for (name, data) in &file.data {
        let name = match name.as_str() {
            "@" => String::new(),
            other => other.trim_end_matches('.').to_lowercase(),
        };
        let label = zone.label_mut(&name);
        fill_label(label, data, &origin)?;
    }

    add_soa(&mut zone)?;
    Ok(zone)
}

fn fill_label(label: &mut Label, data: &LabelData, origin: &str) -> Result<(), ZoneError> {
    if let Some(ttl) = data.ttl {
        label.ttl = ttl;
    }
    if let Some(max_hosts) = data.max_hosts {
        label.max_hosts = max_hosts;
    }
    label.closest = data.closest;

    let test = match &data.health {
        Some(config) => Some(health_test(label, config)?),
        None => None,
    };

    for entry in &data.a {
        let (ip, weight) = entry.parts();
        let addr: Ipv4Addr = ip
            .parse()
            .map_err(|_| invalid(label, RecordType::A, format!("'{}' is not an IPv4 address", ip)))?;
        let mut record = Record::new(RData::A(A(addr)), weight);
        record.test = address_test(label, data, entry, test.as_ref(), addr.into())?;
        label.add_record(RecordType::A, record);
    }

    for entry in &data.aaaa {
        let (ip, weight) = entry.parts();
        let addr: Ipv6Addr = ip.parse().map_err(|_| {
            invalid(label, RecordType::AAAA, format!("'{}' is not an IPv6 address", ip))
        })?;
        let mut record = Record::new(RData::AAAA(AAAA(addr)), weight);
        record.test = address_test(label, data, entry, test.as_ref(), addr.into())?;
        label.add_record(RecordType::AAAA, record);
    }

    if let Some(ns) = &data.ns {
        for name in ns.names() {
            let name = absolute(name, origin)?;
            label.add_record(RecordType::NS, Record::new(RData::NS(NS(name)), 0));
        }
    }

    if let Some(cname) = &data.cname {
        for (name, weight) in cname.entries() {
            let name = absolute(name, origin)?;
            label.add_record(RecordType::CNAME, Record::new(RData::CNAME(CNAME(name)), weight));
        }
    }

    if let Some(alias) = &data.alias {
        label.add_record(ALIAS, Record::alias(&alias.trim_end_matches('.').to_lowercase()));
    }

    for mx in &data.mx {
        let exchange = absolute(&mx.mx, origin)?;
        label.add_record(
            RecordType::MX,
            Record::new(RData::MX(MX::new(mx.preference, exchange)), mx.weight),
        );
    }

    // SPF data is served as TXT.
    for entries in [&data.txt, &data.spf].into_iter().flatten() {
        for (txt, weight) in entries.entries() {
            label.add_record(
                RecordType::TXT,
                Record::new(RData::TXT(TXT::new(vec![txt.to_string()])), weight),
            );
        }
    }

    for srv in &data.srv {
        let target = absolute(&srv.target, origin)?;
        label.add_record(
            RecordType::SRV,
            Record::new(
                RData::SRV(SRV::new(srv.priority, srv.weight, srv.port, target)),
                0,
            ),
        );
    }

    for ptr in &data.ptr {
        let name = absolute(ptr, origin)?;
        label.add_record(RecordType::PTR, Record::new(RData::PTR(PTR(name)), 0));
    }

    // Set whenever any address is checked, so the picker filters this label.
    label.test = test.or_else(|| label.records.values().flatten().find_map(|r| r.test.clone()));
    Ok(())
}

fn health_test(label: &Label, config: &Map<String, Value>) -> Result<HealthTest, ZoneError> {
    HealthTest::from_config(config).map_err(|source| ZoneError::Health {
        label: label.name.clone(),
        source,
    })
}

/// The test for one address: the label's template, or the label's `health`
/// with the entry's own keys laid over it.
fn address_test(
    label: &Label,
    data: &LabelData,
    entry: &AddressEntry,
    template: Option<&HealthTest>,
    ip: IpAddr,
) -> Result<Option<HealthTest>, ZoneError> {
    let Some(overrides) = entry.health() else {
        return Ok(template.map(|t| t.for_ip(ip)));
    };
    let mut config = data.health.clone().unwrap_or_default();
    config.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(Some(health_test(label, &config)?.for_ip(ip)))
}

fn invalid(label: &Label, rtype: RecordType, reason: String) -> ZoneError {
    ZoneError::InvalidRecord {
        label: label.name.clone(),
        rtype: rtype.to_string(),
        reason,
    }
}

/// Names ending in a dot are absolute; anything else is below the origin.
fn absolute(name: &str, origin: &str) -> Result<Name, ZoneError> {
    let full = if name.ends_with('.') {
        name.to_string()
    } else if name.is_empty() || name == "@" {
        format!("{}.", origin)
    } else {
        format!("{}.{}.", name, origin)
    };
    Name::from_ascii(&full).map_err(|_| ZoneError::InvalidName(full))
}

fn add_soa(zone: &mut Zone) -> Result<(), ZoneError> {
    let origin = zone.origin.clone();
    let options = zone.options.clone();
    let apex = zone.label_mut("");

    let mname = match apex.first(RecordType::NS).map(|r| &r.data) {
        Some(RData::NS(ns)) => ns.0.clone(),
        _ => absolute("ns", &origin)?,
    };
    let contact = options.contact.replace('@', ".");
    let rname = if contact.contains('.') && !contact.ends_with('.') {
        absolute(&format!("{}.", contact), &origin)?
    } else {
        absolute(&contact, &origin)?
    };
    let soa = SOA::new(
        mname,
        rname,
        options.serial,
        SOA_REFRESH,
        SOA_RETRY,
        SOA_EXPIRE,
        SOA_MINIMUM,
    );

    apex.records.remove(&RecordType::SOA);
    apex.add_record(RecordType::SOA, Record::new(RData::SOA(soa), 0));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HealthError;
    use crate::targeting::TargetOptions;

    const ZONE: &str = r#"{
        "serial": 3,
        "ttl": 600,
        "max_hosts": 2,
        "contact": "support.example.com",
        "targeting": "country continent @ regiongroup region asn ip",
        "data": {
            "": {
                "ns": {"ns1.example.net.": null, "ns2.example.net.": null},
                "mx": [{"mx": "mx.example.net.", "preference": 10}],
                "a": [["192.168.1.2", 10], ["192.168.1.3", 10]]
            },
            "bar": {"a": [["192.168.1.2", 10]], "max_hosts": 1, "ttl": 601},
            "bar.no": {"a": []},
            "Www.Europe": {"a": ["192.0.2.9"], "aaaa": [{"ip": "2001:db8::9", "weight": 3}]},
            "alias": {"alias": "bar"},
            "cname": {"cname": "geo.example.net."},
            "relative": {"cname": [["www", 1], ["web", 2]]},
            "txt": {"txt": [{"txt": "weighted", "weight": 5}, "plain"]},
            "_sip._udp": {"srv": [{"target": "sip", "port": 5060, "priority": 10, "weight": 5}]},
            "health": {
                "a": [["192.0.2.20", 5], ["192.0.2.21", 5]],
                "health": {"type": "tcp", "port": 443, "frequency": 15}
            }
        }
    }"#;

    fn parse(json: &str) -> Result<Zone, ZoneError> {
        parse_zone("example.com", json.as_bytes(), &ZoneOptions::default())
    }

    #[test]
    fn parses_options_and_labels() {
        let zone = parse(ZONE).unwrap();
        assert_eq!(zone.origin, "example.com");
        assert_eq!(zone.options.serial, 3);
        assert_eq!(zone.options.ttl, 600);
        assert!(zone.options.targeting.contains(TargetOptions::IP));

        let bar = &zone.labels["bar"];
        assert_eq!(bar.max_hosts, 1);
        assert_eq!(bar.ttl, 601);
        assert_eq!(bar.weight[&RecordType::A], 10);

        let www = &zone.labels["www.europe"];
        assert_eq!(www.weight[&RecordType::A], 0);
        assert_eq!(www.weight[&RecordType::AAAA], 3);
        assert_eq!(zone.labels["txt"].records[&RecordType::TXT].len(), 2);
        assert_eq!(zone.labels["txt"].weight[&RecordType::TXT], 5);
    }

    #[test]
    fn synthesizes_soa_from_first_ns() {
        let zone = parse(ZONE).unwrap();
        let apex = &zone.labels[""];
        assert_eq!(apex.records[&RecordType::NS].len(), 2);
        let Some(RData::SOA(soa)) = apex.first(RecordType::SOA).map(|r| &r.data) else {
            panic!("apex has no SOA");
        };
        assert_eq!(soa.mname().to_ascii(), "ns1.example.net.");
        assert_eq!(soa.rname().to_ascii(), "support.example.com.");
        assert_eq!(soa.serial(), 3);
    }

    #[test]
    fn names_are_made_absolute() {
        let zone = parse(ZONE).unwrap();
        let targets: Vec<String> = zone.labels["relative"].records[&RecordType::CNAME]
            .iter()
            .map(|r| r.data.to_string())
            .collect();
        assert_eq!(targets, vec!["www.example.com.", "web.example.com."]);
        let Some(RData::SRV(srv)) = zone.labels["_sip._udp"].first(RecordType::SRV).map(|r| &r.data)
        else {
            panic!("missing SRV");
        };
        assert_eq!(srv.target().to_ascii(), "sip.example.com.");
        assert_eq!(srv.port(), 5060);
    }

    #[test]
    fn aliases_and_health_tests() {
        let zone = parse(ZONE).unwrap();
        let alias = zone.labels["alias"].first(ALIAS).unwrap();
        assert_eq!(alias.alias_target().as_deref(), Some("bar"));

        let health = &zone.labels["health"];
        assert!(health.test.is_some());
        let tests: Vec<_> = health.records[&RecordType::A]
            .iter()
            .map(|r| r.test.as_ref().unwrap())
            .collect();
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].ip, Some("192.0.2.20".parse().unwrap()));
        assert_ne!(tests[0].fingerprint(), tests[1].fingerprint());
        assert!(zone.labels["bar"].records[&RecordType::A][0].test.is_none());
    }

    #[test]
    fn address_entries_can_override_the_label_health() {
        let zone = parse(
            r#"{"data": {
                "www": {
                    "a": [
                        ["192.0.2.1", 5],
                        {"ip": "192.0.2.2", "weight": 5, "health": {"port": 8443, "timeout": 2}}
                    ],
                    "health": {"type": "tcp", "port": 443}
                },
                "api": {
                    "a": ["192.0.2.3", {"ip": "192.0.2.4", "health": {"type": "tcp", "port": 80}}]
                }
            }}"#,
        )
        .unwrap();

        let tests: Vec<_> = zone.labels["www"].records[&RecordType::A]
            .iter()
            .map(|r| r.test.as_ref().unwrap())
            .collect();
        assert_eq!(tests[0].params.timeout, std::time::Duration::from_secs(5));
        assert_eq!(tests[1].params.timeout, std::time::Duration::from_secs(2));
        assert_eq!(tests[1].ip, Some("192.0.2.2".parse().unwrap()));
        assert!(tests[1].fingerprint().ends_with("tcp/8443"));
        assert!(tests[0].fingerprint().ends_with("tcp/443"));

        // Only the entry with its own health is checked; the label still filters.
        let api = &zone.labels["api"];
        assert!(api.records[&RecordType::A][0].test.is_none());
        assert!(api.records[&RecordType::A][1].test.is_some());
        assert!(api.test.is_some());

        assert!(matches!(
            parse(r#"{"data": {"x": {"a": [{"ip": "192.0.2.1", "health": {"port": 80}}]}}}"#),
            Err(ZoneError::Health { source: HealthError::MissingParameter("type"), .. })
        ));
    }

    #[test]
    fn weights_at_the_u32_limit_do_not_overflow() {
        let zone = parse(
            r#"{"data": {"www": {"a": [["192.0.2.1", 4294967295], ["192.0.2.2", 1]], "max_hosts": 1}}}"#,
        )
        .unwrap();
        let www = &zone.labels["www"];
        assert_eq!(www.weight[&RecordType::A], 4_294_967_296);

        let runner = crate::health::HealthTestRunner::new();
        let picked = www.picker(RecordType::A, www.max_hosts, None, &runner);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn configuration_errors() {
        assert!(matches!(
            parse(r#"{"data": {"x": {"a": ["not-an-ip"]}}}"#),
            Err(ZoneError::InvalidRecord { .. })
        ));
        assert!(matches!(
            parse(r#"{"targeting": "country galaxy"}"#),
            Err(ZoneError::Targeting(_))
        ));
        assert!(matches!(
            parse(r#"{"data": {"x": {"health": {"type": "smoke-signal"}}}}"#),
            Err(ZoneError::Health { source: HealthError::UnknownType(_), .. })
        ));
        assert!(matches!(parse("{ nope"), Err(ZoneError::Json(_))));
    }

    #[test]
    fn empty_zone_still_has_an_apex() {
        let zone = parse("{}").unwrap();
        let apex = &zone.labels[""];
        assert!(apex.has_records(RecordType::SOA));
        let Some(RData::SOA(soa)) = apex.first(RecordType::SOA).map(|r| &r.data) else {
            panic!("apex has no SOA");
        };
        assert_eq!(soa.mname().to_ascii(), "ns.example.com.");
        assert_eq!(soa.rname().to_ascii(), "hostmaster.example.com.");
    }

    #[test]
    fn origin_comes_from_the_file_name() {
        let origin = zone_origin(Path::new("/srv/zones/Example.ORG.json")).unwrap();
        assert_eq!(origin, "example.org");
        assert!(matches!(
            zone_origin(Path::new("/")),
            Err(ZoneError::MissingOrigin(_))
        ));
    }
}
