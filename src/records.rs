/* src/records.rs */

//! On-disk zone file schema (JSON).

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Default)]
pub struct ZoneFile {
    pub serial: Option<u32>,
    pub ttl: Option<u32>,
    pub max_hosts: Option<usize>,
    pub contact: Option<String>,
    pub targeting: Option<String>,
    #[serde(default)]
    pub closest: bool,
    #[serde(default)]
    pub data: HashMap<String, LabelData>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LabelData {
    pub ttl: Option<u32>,
    pub max_hosts: Option<usize>,
    #[serde(default)]
    pub closest: bool,
    pub health: Option<Map<String, Value>>,
    #[serde(default)]
    pub a: Vec<AddressEntry>,
    #[serde(default)]
    pub aaaa: Vec<AddressEntry>,
    pub ns: Option<NsEntries>,
    pub cname: Option<NameEntries>,
    pub alias: Option<String>,
    #[serde(default)]
    pub mx: Vec<MxEntry>,
    pub txt: Option<TxtEntries>,
    pub spf: Option<TxtEntries>,
    #[serde(default)]
    pub srv: Vec<SrvEntry>,
    #[serde(default)]
    pub ptr: Vec<String>,
}

/// `"192.0.2.1"`, `["192.0.2.1", 10]` or
/// `{"ip": "192.0.2.1", "weight": 10, "health": {...}}`. The object form's
/// `health` keys override the label's `health` for that address only.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AddressEntry {
    Bare(String),
    Weighted(String, u32),
    Object {
        ip: String,
        #[serde(default)]
        weight: u32,
        health: Option<Map<String, Value>>,
    },
}

impl AddressEntry {
    pub fn parts(&self) -> (&str, u32) {
        match self {
            Self::Bare(ip) => (ip, 0),
            Self::Weighted(ip, weight) => (ip, *weight),
            Self::Object { ip, weight, .. } => (ip, *weight),
        }
    }

    pub fn health(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Object { health, .. } => health.as_ref(),
            _ => None,
        }
    }
}

/// A list of name servers, or a map of name server to (ignored) glue.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NsEntries {
    List(Vec<String>),
    Map(HashMap<String, Option<String>>),
}

impl NsEntries {
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Map(names) => names.keys().map(String::as_str).collect(),
        };
        if matches!(self, Self::Map(_)) {
            names.sort_unstable();
        }
        names
    }
}

/// A single target name or a weighted list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NameEntries {
    Single(String),
    Weighted(Vec<WeightedName>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WeightedName {
    Bare(String),
    Pair(String, u32),
}

impl NameEntries {
    pub fn entries(&self) -> Vec<(&str, u32)> {
        match self {
            Self::Single(name) => vec![(name, 0)],
            Self::Weighted(names) => names
                .iter()
                .map(|entry| match entry {
                    WeightedName::Bare(name) => (name.as_str(), 0),
                    WeightedName::Pair(name, weight) => (name.as_str(), *weight),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MxEntry {
    pub mx: String,
    #[serde(default)]
    pub preference: u16,
    #[serde(default)]
    pub weight: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TxtEntries {
    Single(String),
    List(Vec<TxtEntry>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TxtEntry {
    Bare(String),
    Object {
        txt: String,
        #[serde(default)]
        weight: u32,
    },
}

impl TxtEntries {
    pub fn entries(&self) -> Vec<(&str, u32)> {
        match self {
            Self::Single(txt) => vec![(txt, 0)],
            Self::List(list) => list
                .iter()
                .map(|entry| match entry {
                    TxtEntry::Bare(txt) => (txt.as_str(), 0),
                    TxtEntry::Object { txt, weight } => (txt.as_str(), *weight),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SrvEntry {
    pub target: String,
    pub port: u16,
    #[serde(default)]
    pub priority: u16,
    #[serde(default)]
    pub weight: u16,
}
