/* src/zone/find.rs */

use super::{ALIAS, Label, Zone};
use fancy_log::{LogLevel, log};
use hickory_proto::rr::RecordType;

/// Aliases are followed at most this many levels deep.
pub const MAX_ALIAS_DEPTH: usize = 8;

/// A label able to answer a query, and the type it answers with. `None`
/// means the name exists but has nothing of the requested types.
#[derive(Debug, Clone, Copy)]
pub struct LabelMatch<'a> {
    pub label: &'a Label,
    pub rtype: Option<RecordType>,
}

impl Zone {
    /// Finds every label/type combination that could answer a query for
    /// `label`, walking `targets` from most to least specific. Callers try the
    /// matches in order and stop at the first one yielding records.
    pub fn find_labels(
        &self,
        label: &str,
        targets: &[String],
        qtypes: &[RecordType],
    ) -> Vec<LabelMatch<'_>> {
        self.find_labels_at(label, targets, qtypes, 0)
    }

    fn find_labels_at(
        &self,
        label: &str,
        targets: &[String],
        qtypes: &[RecordType],
        depth: usize,
    ) -> Vec<LabelMatch<'_>> {
        let mut matches = Vec::new();

        for target in targets {
            let name = match target.as_str() {
                "@" => label.to_string(),
                t if label.is_empty() => t.to_string(),
                t => format!("{}.{}", label, t),
            };
            let Some(candidate) = self.labels.get(&name) else {
                continue;
            };

            for &qtype in qtypes {
                if qtype == RecordType::ANY {
                    if let Some(exact) = self.labels.get(label) {
                        matches.push(LabelMatch {
                            label: exact,
                            rtype: Some(qtype),
                        });
                    }
                    break;
                }

                if qtype == ALIAS {
                    let Some(alias) = candidate.first(ALIAS).and_then(|r| r.alias_target())
                    else {
                        continue;
                    };
                    if depth >= MAX_ALIAS_DEPTH {
                        log(
                            LogLevel::Warn,
                            &format!(
                                "{}: alias chain through '{}' is deeper than {}, giving up",
                                self.origin, name, MAX_ALIAS_DEPTH
                            ),
                        );
                        continue;
                    }
                    // Aliases never answer with authority records.
                    let alias_types: Vec<RecordType> = qtypes
                        .iter()
                        .copied()
                        .filter(|t| *t != RecordType::NS && *t != RecordType::SOA)
                        .collect();
                    let aliased = self.find_labels_at(&alias, targets, &alias_types, depth + 1);
                    if aliased.is_empty() {
                        continue;
                    }
                    matches.extend(aliased);
                    break;
                }

                if candidate.has_records(qtype) {
                    matches.push(LabelMatch {
                        label: candidate,
                        rtype: Some(qtype),
                    });
                    break;
                }
            }
        }

        if matches.is_empty() {
            if let Some(exact) = self.labels.get(label) {
                matches.push(LabelMatch {
                    label: exact,
                    rtype: None,
                });
            }
        }

        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::tests::a;
    use crate::zone::{Record, ZoneOptions};
    use hickory_proto::rr::rdata::{CNAME, NS, SOA};
    use hickory_proto::rr::{Name, RData};

    fn targets(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    fn zone() -> Zone {
        let mut zone = Zone::new("example.com", ZoneOptions::default());
        zone.label_mut("bar").add_record(RecordType::A, a("192.168.1.2", 0));
        zone.label_mut("www").add_record(RecordType::A, a("192.0.2.1", 0));
        zone.label_mut("www.europe").add_record(RecordType::A, a("192.0.2.2", 0));
        zone.label_mut("www.no").add_record(RecordType::A, a("192.0.2.3", 0));
        zone.label_mut("europe").add_record(RecordType::A, a("192.0.2.4", 0));
        zone.label_mut("empty");
        zone
    }

    fn answers(matches: &[LabelMatch<'_>]) -> Vec<(String, Option<RecordType>)> {
        matches
            .iter()
            .map(|m| (m.label.name.clone(), m.rtype))
            .collect()
    }

    #[test]
    fn falls_back_to_the_global_label() {
        let zone = zone();
        let matches = zone.find_labels("bar", &targets(&["no", "europe", "@"]), &[RecordType::A]);
        assert_eq!(answers(&matches), vec![("bar".to_string(), Some(RecordType::A))]);
        let records = &matches[0].label.records[&RecordType::A];
        assert_eq!(records[0].ip(), Some("192.168.1.2".parse().unwrap()));
    }

    #[test]
    fn preserves_target_order() {
        let zone = zone();
        let matches = zone.find_labels("www", &targets(&["no", "europe", "@"]), &[RecordType::A]);
        assert_eq!(
            answers(&matches),
            vec![
                ("www.no".to_string(), Some(RecordType::A)),
                ("www.europe".to_string(), Some(RecordType::A)),
                ("www".to_string(), Some(RecordType::A)),
            ]
        );
    }

    #[test]
    fn apex_queries_use_the_bare_target() {
        let zone = zone();
        let matches = zone.find_labels("", &targets(&["europe", "@"]), &[RecordType::A]);
        assert_eq!(answers(&matches)[0], ("europe".to_string(), Some(RecordType::A)));
    }

    #[test]
    fn first_matching_type_wins_per_target() {
        let mut zone = zone();
        let both = zone.label_mut("both");
        let cname = RData::CNAME(CNAME(name("x.example.net.")));
        both.add_record(RecordType::CNAME, Record::new(cname, 0));
        both.add_record(RecordType::A, a("192.0.2.9", 0));

        let qtypes = [RecordType::CNAME, RecordType::A];
        let matches = zone.find_labels("both", &targets(&["@"]), &qtypes);
        assert_eq!(
            answers(&matches),
            vec![("both".to_string(), Some(RecordType::CNAME))]
        );
    }

    #[test]
    fn existing_name_without_data_is_an_empty_match() {
        let zone = zone();
        let matches = zone.find_labels("empty", &targets(&["@"]), &[RecordType::A]);
        assert_eq!(answers(&matches), vec![("empty".to_string(), None)]);

        assert!(zone.find_labels("missing", &targets(&["@"]), &[RecordType::A]).is_empty());
    }

    #[test]
    fn any_short_circuits_to_the_exact_label() {
        let zone = zone();
        let matches = zone.find_labels("www", &targets(&["europe", "@"]), &[RecordType::ANY]);
        assert_eq!(
            answers(&matches),
            vec![
                ("www".to_string(), Some(RecordType::ANY)),
                ("www".to_string(), Some(RecordType::ANY)),
            ]
        );
    }

    #[test]
    fn aliases_resolve_without_authority_records() {
        let mut zone = zone();
        zone.label_mut("x").add_record(ALIAS, Record::alias("y"));
        let y = zone.label_mut("y");
        let cname = RData::CNAME(CNAME(name("geo.example.net.")));
        y.add_record(RecordType::CNAME, Record::new(cname, 0));
        let ns = RData::NS(NS(name("ns1.example.net.")));
        y.add_record(RecordType::NS, Record::new(ns, 0));
        let soa = SOA::new(
            name("ns1.example.net."),
            name("hostmaster.example.com."),
            1,
            5400,
            5400,
            1209600,
            600,
        );
        y.add_record(RecordType::SOA, Record::new(RData::SOA(soa), 0));

        let matches = zone.find_labels(
            "x",
            &targets(&["@"]),
            &[ALIAS, RecordType::SOA, RecordType::NS, RecordType::CNAME],
        );
        assert_eq!(answers(&matches), vec![("y".to_string(), Some(RecordType::CNAME))]);
    }

    #[test]
    fn alias_loops_are_cut_off() {
        let mut zone = zone();
        zone.label_mut("loop1").add_record(ALIAS, Record::alias("loop2"));
        zone.label_mut("loop2").add_record(ALIAS, Record::alias("loop1"));

        let matches = zone.find_labels("loop1", &targets(&["@"]), &[ALIAS, RecordType::A]);
        // The innermost lookup falls through to the empty match for its name.
        assert!(!matches.is_empty());
        assert!(matches.iter().all(|m| m.rtype.is_none()));
    }
}
