/* src/zone/store.rs */

use super::Zone;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub type ZoneMap = HashMap<String, Arc<Zone>>;

/// The served zones. Readers take an immutable snapshot; writers replace
/// the whole map, so a query never sees a half-applied reload.
#[derive(Default)]
pub struct ZoneStore {
    zones: RwLock<Arc<ZoneMap>>,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<ZoneMap> {
        self.zones.read().clone()
    }

    pub fn get(&self, origin: &str) -> Option<Arc<Zone>> {
        self.zones.read().get(&origin.to_lowercase()).cloned()
    }

    /// Installs `zone`, returning the zone it replaced.
    pub fn insert(&self, zone: Arc<Zone>) -> Option<Arc<Zone>> {
        let mut zones = self.zones.write();
        let mut next = ZoneMap::clone(&zones);
        let previous = next.insert(zone.origin.clone(), zone);
        *zones = Arc::new(next);
        previous
    }

    pub fn remove(&self, origin: &str) -> Option<Arc<Zone>> {
        let mut zones = self.zones.write();
        if !zones.contains_key(origin) {
            return None;
        }
        let mut next = ZoneMap::clone(&zones);
        let removed = next.remove(origin);
        *zones = Arc::new(next);
        removed
    }

    pub fn origins(&self) -> Vec<String> {
        self.zones.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.zones.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.read().is_empty()
    }

    /// The most specific zone for `name`, with the label part of the name
    /// relative to that zone's origin.
    pub fn find_zone(&self, name: &str) -> Option<(Arc<Zone>, String)> {
        let name = name.trim_end_matches('.').to_lowercase();
        let zones = self.snapshot();

        let mut candidate = name.as_str();
        loop {
            if let Some(zone) = zones.get(candidate) {
                let label = name[..name.len() - candidate.len()]
                    .trim_end_matches('.')
                    .to_string();
                return Some((zone.clone(), label));
            }
            match candidate.split_once('.') {
                Some((_, parent)) => candidate = parent,
                None => return None,
            }
        }
    }
}
