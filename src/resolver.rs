/* src/resolver.rs */

use crate::geoip::GeoProvider;
use crate::health::HealthTestRunner;
use crate::status::{COUNTRY_LABEL, STATUS_LABEL, STATUS_ZONE, ServerStatus, country_txt};
use crate::targeting::TargetOptions;
use crate::zone::{ALIAS, Zone, ZoneStore};
use hickory_proto::op::{Query, ResponseCode};
use hickory_proto::rr::rdata::TXT;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::net::IpAddr;
use std::sync::Arc;

/// The outcome of resolving one question.
#[derive(Debug)]
pub struct Answer {
    pub code: ResponseCode,
    pub answers: Vec<Record>,
    pub authority: Vec<Record>,
}

impl Answer {
    fn refused() -> Self {
        Self {
            code: ResponseCode::Refused,
            answers: Vec::new(),
            authority: Vec::new(),
        }
    }

    fn empty(code: ResponseCode, zone: &Zone) -> Self {
        Self {
            code,
            answers: Vec::new(),
            authority: soa_authority(zone),
        }
    }
}

pub struct DnsResolver {
    store: Arc<ZoneStore>,
    runner: Arc<HealthTestRunner>,
    geo: Arc<dyn GeoProvider>,
    status: ServerStatus,
}

impl DnsResolver {
    pub fn new(
        store: Arc<ZoneStore>,
        runner: Arc<HealthTestRunner>,
        geo: Arc<dyn GeoProvider>,
    ) -> Self {
        Self {
            store,
            runner,
            geo,
            status: ServerStatus::new(),
        }
    }

    /// The main resolution logic.
    pub async fn resolve(&self, query: &Query, client: IpAddr, edns: bool) -> Answer {
        let qname = query.name();
        let Some((zone, label)) = self.store.find_zone(&qname.to_ascii()) else {
            return Answer::refused();
        };
        let known = zone.labels.contains_key(&label).then_some(label.as_str());
        zone.metrics.record_query(known, edns);

        if zone.origin == STATUS_ZONE {
            return self.resolve_status(&zone, &label, query, client).await;
        }

        let qtype = query.query_type();
        let (targets, _netmask, location) = zone
            .options
            .targeting
            .get_targets(client, zone.has_closest(), self.geo.as_ref())
            .await;

        let matches = zone.find_labels(&label, &targets, &[ALIAS, RecordType::CNAME, qtype]);
        if matches.is_empty() {
            return Answer::empty(ResponseCode::NXDomain, &zone);
        }

        for found in matches {
            let Some(rtype) = found.rtype else {
                // The name exists, just without data of this type.
                break;
            };
            let closest = zone.options.closest || found.label.closest;
            let picked = found.label.picker(
                rtype,
                found.label.max_hosts,
                location.as_ref().filter(|_| closest),
                self.runner.as_ref(),
            );
            if picked.is_empty() {
                continue;
            }

            let ttl = label_ttl(&zone, found.label.ttl);
            let answers = picked
                .into_iter()
                .map(|record| Record::from_rdata(qname.clone(), ttl, record.data.clone()))
                .collect();
            return Answer {
                code: ResponseCode::NoError,
                answers,
                authority: Vec::new(),
            };
        }

        Answer::empty(ResponseCode::NoError, &zone)
    }

    async fn resolve_status(
        &self,
        zone: &Zone,
        label: &str,
        query: &Query,
        client: IpAddr,
    ) -> Answer {
        let text = match label {
            STATUS_LABEL => {
                self.status
                    .status_txt(self.store.len().saturating_sub(1), self.runner.len())
            }
            COUNTRY_LABEL => {
                let all = TargetOptions::GLOBAL
                    | TargetOptions::CONTINENT
                    | TargetOptions::COUNTRY
                    | TargetOptions::REGION_GROUP
                    | TargetOptions::REGION
                    | TargetOptions::ASN;
                let (targets, _, location) =
                    all.get_targets(client, true, self.geo.as_ref()).await;
                country_txt(client, &targets, location.as_ref())
            }
            _ => return Answer::empty(ResponseCode::NXDomain, zone),
        };

        let qtype = query.query_type();
        if qtype != RecordType::TXT && qtype != RecordType::ANY {
            return Answer::empty(ResponseCode::NoError, zone);
        }
        let record = Record::from_rdata(
            query.name().clone(),
            zone.options.ttl,
            RData::TXT(TXT::new(vec![text])),
        );
        Answer {
            code: ResponseCode::NoError,
            answers: vec![record],
            authority: Vec::new(),
        }
    }
}

fn label_ttl(zone: &Zone, ttl: u32) -> u32 {
    if ttl > 0 { ttl } else { zone.options.ttl }
}

fn soa_authority(zone: &Zone) -> Vec<Record> {
    let Some(apex) = zone.labels.get("") else {
        return Vec::new();
    };
    let Some(soa) = apex.first(RecordType::SOA) else {
        return Vec::new();
    };
    let Ok(origin) = Name::from_ascii(format!("{}.", zone.origin)) else {
        return Vec::new();
    };
    vec![Record::from_rdata(origin, zone.options.ttl, soa.data.clone())]
}
