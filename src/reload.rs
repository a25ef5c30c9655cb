/* src/reload.rs */

use crate::error::{ReloadError, ZoneError};
use crate::geoip::GeoProvider;
use crate::health::HealthTestRunner;
use crate::status::STATUS_ZONE;
use crate::zone::{ZoneOptions, ZoneStore, parse_zone, zone_origin};
use fancy_log::{LogLevel, log};
use ring::digest::{SHA256, digest};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, watch};
use tokio::time::{MissedTickBehavior, interval};

/// What the last pass saw of one zone file.
struct FileState {
    modified: SystemTime,
    hash: Vec<u8>,
}

/// Keeps the served zones in step with a directory of `<origin>.json` files.
pub struct ZoneReloader {
    dir: PathBuf,
    store: Arc<ZoneStore>,
    runner: Arc<HealthTestRunner>,
    geo: Arc<dyn GeoProvider>,
    defaults: ZoneOptions,
    seen: Mutex<HashMap<String, FileState>>,
}

impl ZoneReloader {
    pub fn new(
        dir: impl Into<PathBuf>,
        store: Arc<ZoneStore>,
        runner: Arc<HealthTestRunner>,
        geo: Arc<dyn GeoProvider>,
        defaults: ZoneOptions,
    ) -> Self {
        Self {
            dir: dir.into(),
            store,
            runner,
            geo,
            defaults,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// One scan of the zones directory. Failed files keep their previously
    /// served zone and are reported together once the scan is finished.
    pub async fn reload(&self) -> Result<(), ReloadError> {
        let mut seen = self.seen.lock().await;
        let mut failures = Vec::new();
        let mut present = HashSet::new();

        let paths = match zone_files(&self.dir) {
            Ok(paths) => paths,
            Err(e) => {
                return Err(ReloadError {
                    failures: vec![(self.dir.clone(), e)],
                });
            }
        };

        for path in paths {
            let origin = match self.refresh(&path, &mut seen).await {
                Ok(origin) => origin,
                Err((origin, e)) => {
                    log(
                        LogLevel::Error,
                        &format!("Failed to load zone file {}: {}", path.display(), e),
                    );
                    failures.push((path, e));
                    match origin {
                        Some(origin) => origin,
                        None => continue,
                    }
                }
            };
            present.insert(origin);
        }

        let gone: Vec<String> = seen
            .keys()
            .filter(|origin| !present.contains(*origin) && origin.as_str() != STATUS_ZONE)
            .cloned()
            .collect();
        for origin in gone {
            seen.remove(&origin);
            if let Some(zone) = self.store.remove(&origin) {
                log(LogLevel::Info, &format!("Removed zone '{}'", origin));
                zone.close(&self.runner).await;
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ReloadError { failures })
        }
    }

    /// Brings one file's zone up to date, returning its origin. Unchanged
    /// files (same mtime, or same content under a new mtime) are left alone.
    async fn refresh(
        &self,
        path: &Path,
        seen: &mut HashMap<String, FileState>,
    ) -> Result<String, (Option<String>, ZoneError)> {
        let origin = zone_origin(path).map_err(|e| (None, e))?;
        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|e| (Some(origin.clone()), ZoneError::from(e)))?;

        if seen.get(&origin).is_some_and(|state| state.modified == modified) {
            return Ok(origin);
        }
        let contents = fs::read(path).map_err(|e| (Some(origin.clone()), ZoneError::from(e)))?;

        if let Some(state) = seen.get_mut(&origin) {
            let hash = digest(&SHA256, &contents);
            if state.hash == hash.as_ref() {
                log(
                    LogLevel::Debug,
                    &format!("Zone file for '{}' touched but unchanged", origin),
                );
                state.modified = modified;
                return Ok(origin);
            }
        }

        // Recorded even when the install fails; the next change retries.
        seen.insert(
            origin.clone(),
            FileState {
                modified,
                hash: digest(&SHA256, &contents).as_ref().to_vec(),
            },
        );

        match self.install(&origin, &contents).await {
            Ok(()) => Ok(origin),
            Err(e) => Err((Some(origin), e)),
        }
    }

    async fn install(&self, origin: &str, contents: &[u8]) -> Result<(), ZoneError> {
        let mut zone = parse_zone(origin, contents, &self.defaults)?;
        zone.resolve_locations(self.geo.as_ref()).await;

        let previous = self.store.get(origin);
        if let Some(prev) = &previous {
            zone.adopt_metrics(prev);
        }
        zone.start_health_tests(&self.runner, previous.as_deref());

        let zone = Arc::new(zone);
        let labels = zone.labels.len();
        if let Some(old) = self.store.insert(zone) {
            old.close(&self.runner).await;
            log(
                LogLevel::Info,
                &format!("Reloaded zone '{}' ({} labels)", origin, labels),
            );
            let busiest: Vec<String> = old
                .metrics
                .top_labels(3)
                .into_iter()
                .map(|(label, count)| format!("{}={}", label, count))
                .collect();
            log(
                LogLevel::Debug,
                &format!(
                    "Zone '{}' served {} queries ({} with EDNS), busiest: [{}]",
                    origin,
                    old.metrics.queries(),
                    old.metrics.edns_queries(),
                    busiest.join(", ")
                ),
            );
        } else {
            log(
                LogLevel::Info,
                &format!("Loaded zone '{}' ({} labels)", origin, labels),
            );
        }
        Ok(())
    }

    /// Runs `reload` every `period` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial load is the caller's.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reload().await {
                        log(LogLevel::Warn, &format!("Zone reload incomplete: {}", e));
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log(LogLevel::Debug, "Zone reload loop stopped");
                        return;
                    }
                }
            }
        }
    }
}

/// `*.json` files directly under `dir`, sorted by name.
fn zone_files(dir: &Path) -> Result<Vec<PathBuf>, ZoneError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
