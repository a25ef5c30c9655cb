/* src/health/runner.rs */

use super::scheduler::ScheduledTest;
use super::{HealthCheck, HealthStatus, HealthTest};
use fancy_log::{LogLevel, log};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

struct RunnerEntry {
    scheduled: ScheduledTest,
    references: HashSet<String>,
}

/// Registry of running health tests, one scheduler per fingerprint, shared
/// by every record (in any zone) that references an equivalent test.
#[derive(Default)]
pub struct HealthTestRunner {
    entries: RwLock<HashMap<String, RunnerEntry>>,
}

impl HealthTestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `reference` as a user of `test`, starting a scheduler for
    /// the fingerprint when it is the first. Must run inside a tokio runtime.
    pub fn add_reference(&self, test: &HealthTest, reference: &str) {
        let fingerprint = test.fingerprint();
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&fingerprint) {
            entry.references.insert(reference.to_string());
            return;
        }

        log(
            LogLevel::Debug,
            &format!("starting health test {}", fingerprint),
        );
        let scheduled = ScheduledTest::start(test, test.local_healthy());
        entries.insert(
            fingerprint,
            RunnerEntry {
                scheduled,
                references: HashSet::from([reference.to_string()]),
            },
        );
    }

    /// Drops `reference` from `test`. The last reference stops the scheduler
    /// and waits for it to acknowledge. Unknown tests or references are
    /// ignored.
    pub async fn remove_reference(&self, test: &HealthTest, reference: &str) {
        let fingerprint = test.fingerprint();
        let removed = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(&fingerprint) else {
                return;
            };
            entry.references.remove(reference);
            if !entry.references.is_empty() {
                return;
            }
            entries.remove(&fingerprint)
        };

        if let Some(entry) = removed {
            test.set_local_healthy(entry.scheduled.is_healthy(test.ip));
            entry.scheduled.stop().await;
            log(
                LogLevel::Debug,
                &format!("stopped health test {}", fingerprint),
            );
        }
    }

    /// Current health of `test`, falling back to its own last known value
    /// when nothing is running for it.
    pub fn is_healthy(&self, test: &HealthTest) -> bool {
        match self.entries.read().get(&test.fingerprint()) {
            Some(entry) => entry.scheduled.is_healthy(test.ip),
            None => test.local_healthy(),
        }
    }

    /// Number of running schedulers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of references held on the scheduler for `test`.
    pub fn reference_count(&self, test: &HealthTest) -> usize {
        self.entries
            .read()
            .get(&test.fingerprint())
            .map_or(0, |entry| entry.references.len())
    }

    /// Stops every scheduler, waiting for each to acknowledge.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, RunnerEntry)> = self.entries.write().drain().collect();
        for (fingerprint, entry) in drained {
            if !entry.scheduled.stop().await {
                log(
                    LogLevel::Debug,
                    &format!("health test {} was already stopped", fingerprint),
                );
            }
        }
    }
}

impl HealthCheck for HealthTestRunner {
    fn status(&self, test: &HealthTest) -> HealthStatus {
        match self.entries.read().get(&test.fingerprint()) {
            Some(entry) if entry.scheduled.is_healthy(test.ip) => HealthStatus::Healthy,
            Some(_) => HealthStatus::Unhealthy,
            None => HealthStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthTestParameters, Probe, ProbeOutcome};
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedProbe(bool);

    #[async_trait]
    impl Probe for FixedProbe {
        async fn test(&self, _ip: Option<IpAddr>) -> ProbeOutcome {
            self.0.into()
        }

        fn identity(&self) -> String {
            format!("fixed/{}", self.0)
        }
    }

    fn test_for(ip: &str, up: bool, healthy_initially: bool) -> HealthTest {
        let params = HealthTestParameters {
            frequency: Duration::from_secs(5),
            retry_time: Duration::from_secs(1),
            retries: 1,
            healthy_initially,
            ..Default::default()
        };
        HealthTest::new(Some(ip.parse().unwrap()), params, Arc::new(FixedProbe(up)))
    }

    #[tokio::test(start_paused = true)]
    async fn equivalent_tests_share_one_scheduler() {
        let runner = HealthTestRunner::new();
        // Same configuration, built independently for two zones.
        let a = test_for("192.0.2.1", true, false);
        let b = test_for("192.0.2.1", true, false);

        runner.add_reference(&a, "example.com#1/www");
        runner.add_reference(&b, "example.net#2/www");
        assert_eq!(runner.len(), 1);
        assert_eq!(runner.reference_count(&a), 2);

        runner.remove_reference(&a, "example.com#1/www").await;
        assert_eq!(runner.len(), 1);

        runner.remove_reference(&b, "example.net#2/www").await;
        assert_eq!(runner.len(), 0);
        assert!(runner.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn removing_unknown_references_is_a_no_op() {
        let runner = HealthTestRunner::new();
        let a = test_for("192.0.2.1", true, false);
        runner.remove_reference(&a, "nobody").await;

        runner.add_reference(&a, "zone#1/www");
        runner.remove_reference(&a, "somebody-else").await;
        assert_eq!(runner.len(), 1);

        runner.remove_reference(&a, "zone#1/www").await;
        runner.remove_reference(&a, "zone#1/www").await;
        assert!(runner.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn health_follows_the_probe_and_survives_removal() {
        let runner = HealthTestRunner::new();
        let up = test_for("192.0.2.1", true, false);
        let down = test_for("192.0.2.2", false, true);

        assert_eq!(runner.status(&up), HealthStatus::Unknown);
        assert!(!runner.is_healthy(&up));

        runner.add_reference(&up, "zone#1/a");
        runner.add_reference(&down, "zone#1/a");
        assert_eq!(runner.status(&up), HealthStatus::Unhealthy);
        assert_eq!(runner.status(&down), HealthStatus::Healthy);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.status(&up), HealthStatus::Healthy);
        assert_eq!(runner.status(&down), HealthStatus::Unhealthy);

        // The last known health is written back to the caller's test.
        runner.remove_reference(&up, "zone#1/a").await;
        assert!(up.local_healthy());
        assert!(runner.is_healthy(&up));

        runner.shutdown().await;
        assert!(runner.is_empty());
    }
}
