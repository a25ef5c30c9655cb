/* src/health/scheduler.rs */

use super::probes::{Probe, ProbeOutcome};
use super::{HealthTest, HealthTestParameters};
use fancy_log::{LogLevel, log};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, sleep, timeout};

/// Health of one scheduled test. Only the scheduler task writes it.
#[derive(Debug, Clone)]
pub(crate) struct HealthState {
    pub healthy: bool,
    pub fail_count: u32,
    pub hosts: HashMap<String, bool>,
}

impl HealthState {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy,
            fail_count: 0,
            hosts: HashMap::new(),
        }
    }

    /// Folds one probe outcome into the state. A single success recovers
    /// immediately; it takes `retries` consecutive failures to go down.
    /// Returns the new health when it changed.
    pub fn apply(&mut self, outcome: ProbeOutcome, retries: u32) -> Option<bool> {
        let before = self.healthy;
        match outcome {
            ProbeOutcome::Up => {
                self.healthy = true;
                self.fail_count = 0;
            }
            ProbeOutcome::Hosts(hosts) => {
                self.healthy = true;
                self.fail_count = 0;
                self.hosts = hosts;
            }
            ProbeOutcome::Down => {
                self.fail_count = self.fail_count.saturating_add(1);
                if self.fail_count >= retries.max(1) {
                    self.healthy = false;
                }
            }
        }
        (before != self.healthy).then_some(self.healthy)
    }

    /// Health for one target. Hosts reported by a global probe win over the
    /// probe's own health.
    pub fn lookup(&self, ip: Option<IpAddr>, global: bool) -> bool {
        if global {
            if let Some(healthy) = ip.and_then(|ip| self.hosts.get(&ip.to_string())) {
                return *healthy;
            }
        }
        self.healthy
    }

    /// Healthy tests poll at their frequency; anything failing re-checks at
    /// the retry interval.
    fn next_poll(&self, params: &HealthTestParameters) -> Duration {
        let period = if self.healthy && self.fail_count == 0 {
            params.frequency
        } else {
            params.retry_time
        };
        jitter(period)
    }
}

fn jitter(period: Duration) -> Duration {
    let millis = period.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

enum Command {
    Stop(oneshot::Sender<()>),
}

/// Handle to a running scheduler task.
pub(crate) struct ScheduledTest {
    state: Arc<RwLock<HealthState>>,
    commands: mpsc::Sender<Command>,
    global: bool,
}

impl ScheduledTest {
    /// Spawns the polling loop for `test`, starting from `healthy`.
    pub fn start(test: &HealthTest, healthy: bool) -> Self {
        let state = Arc::new(RwLock::new(HealthState::new(healthy)));
        let (commands, command_rx) = mpsc::channel(1);

        let scheduler = Scheduler {
            name: test.fingerprint(),
            ip: test.ip,
            params: test.params.clone(),
            probe: test.probe().clone(),
            state: state.clone(),
        };
        tokio::spawn(scheduler.run(command_rx));

        Self {
            state,
            commands,
            global: test.params.global,
        }
    }

    #[cfg(test)]
    pub fn healthy(&self) -> bool {
        self.state.read().healthy
    }

    pub fn is_healthy(&self, ip: Option<IpAddr>) -> bool {
        self.state.read().lookup(ip, self.global)
    }

    /// Asks the scheduler to exit and waits for its acknowledgement. After
    /// this returns no further state writes happen. Stopping an already
    /// stopped test returns `false`.
    pub async fn stop(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Stop(ack_tx)).await.is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }
}

struct Scheduler {
    name: String,
    ip: Option<IpAddr>,
    params: HealthTestParameters,
    probe: Arc<dyn Probe>,
    state: Arc<RwLock<HealthState>>,
}

impl Scheduler {
    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        let (result_tx, mut results) = mpsc::channel::<ProbeOutcome>(1);
        let mut probing = false;

        loop {
            let delay = self.state.read().next_poll(&self.params);

            tokio::select! {
                command = commands.recv() => {
                    if let Some(Command::Stop(ack)) = command {
                        let _ = ack.send(());
                    }
                    break;
                }
                _ = sleep(delay), if !probing => {
                    probing = true;
                    let probe = self.probe.clone();
                    let ip = self.ip;
                    let limit = self.params.timeout;
                    let tx = result_tx.clone();
                    tokio::spawn(async move {
                        let outcome = timeout(limit, probe.test(ip))
                            .await
                            .unwrap_or(ProbeOutcome::Down);
                        let _ = tx.send(outcome).await;
                    });
                }
                Some(outcome) = results.recv(), if probing => {
                    probing = false;
                    self.record(outcome);
                }
            }
        }

        log(LogLevel::Debug, &format!("health test {} stopped", self.name));
    }

    fn record(&self, outcome: ProbeOutcome) {
        let (changed, fail_count) = {
            let mut state = self.state.write();
            let changed = state.apply(outcome, self.params.retries);
            (changed, state.fail_count)
        };
        match changed {
            Some(true) => log(LogLevel::Info, &format!("{} is now healthy", self.target())),
            Some(false) => log(
                LogLevel::Warn,
                &format!(
                    "{} is now unhealthy after {} failed checks",
                    self.target(),
                    fail_count
                ),
            ),
            None => {}
        }
    }

    fn target(&self) -> String {
        match self.ip {
            Some(ip) if !self.params.global => format!("{} ({})", ip, self.probe.identity()),
            _ => self.probe.identity(),
        }
    }
}
