//! Continuous reconciliation of every Application.
//!
//! The controller is the host side of the reconciler: it lists Applications,
//! runs passes, and turns each pass's [`NextAction`] into a timer. At most one
//! pass per Application runs at a time; different Applications run
//! concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use potato_core::{Application, ControllerConfig, NamespacedName};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::host::ApplicationApi;
use crate::orchestrator::ApplicationReconciler;
use crate::outcome::{NextAction, ReconcileOutcome};

/// Timing of the controller loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Interval between Application listings.
    pub rescan_interval: Duration,
    /// First delay after a failed pass.
    pub error_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for LoopConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            rescan_interval: config.rescan_interval(),
            error_backoff: config.error_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

impl LoopConfig {
    /// Delay before retrying after `failures` consecutive failed passes.
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.error_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    due: Instant,
    failures: u32,
}

/// When each known Application is due for its next pass.
#[derive(Debug, Default)]
pub struct Schedule {
    entries: HashMap<NamespacedName, Entry>,
    running: HashSet<NamespacedName>,
}

impl Schedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a fresh listing. Unseen Applications are due now, and so are
    /// tracked ones missing from the listing, so their deletion is handled
    /// promptly.
    pub fn observe(&mut self, listed: &[NamespacedName], now: Instant) {
        let listed_set: HashSet<&NamespacedName> = listed.iter().collect();
        for key in listed {
            self.entries.entry(key.clone()).or_insert(Entry {
                due: now,
                failures: 0,
            });
        }
        for (key, entry) in &mut self.entries {
            if !listed_set.contains(key) && !self.running.contains(key) {
                entry.due = entry.due.min(now);
            }
        }
    }

    /// Take every Application that is due and not already running, marking it
    /// as running.
    pub fn take_due(&mut self, now: Instant) -> Vec<NamespacedName> {
        let mut due: Vec<NamespacedName> = self
            .entries
            .iter()
            .filter(|(key, entry)| entry.due <= now && !self.running.contains(*key))
            .map(|(key, _)| key.clone())
            .collect();
        due.sort();
        self.running.extend(due.iter().cloned());
        due
    }

    /// Earliest due time among Applications that are not running.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|(key, _)| !self.running.contains(*key))
            .map(|(_, entry)| entry.due)
            .min()
    }

    /// Record the end of a pass and schedule the next one.
    pub fn complete(
        &mut self,
        key: &NamespacedName,
        next: NextAction,
        config: &LoopConfig,
        now: Instant,
    ) -> Option<Duration> {
        self.running.remove(key);
        match next {
            NextAction::Done => {
                self.entries.remove(key);
                None
            }
            NextAction::RequeueAfter(delay) => {
                self.entries.insert(
                    key.clone(),
                    Entry {
                        due: deadline(now, delay),
                        failures: 0,
                    },
                );
                Some(delay)
            }
            NextAction::Backoff => {
                let failures = self
                    .entries
                    .get(key)
                    .map_or(0, |entry| entry.failures)
                    .saturating_add(1);
                let delay = config.backoff(failures);
                self.entries.insert(
                    key.clone(),
                    Entry {
                        due: deadline(now, delay),
                        failures,
                    },
                );
                Some(delay)
            }
        }
    }

    /// Consecutive failures recorded for `key`.
    #[must_use]
    pub fn failures(&self, key: &NamespacedName) -> u32 {
        self.entries.get(key).map_or(0, |entry| entry.failures)
    }

    #[must_use]
    pub fn is_tracked(&self, key: &NamespacedName) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs reconciliation passes for every Application until stopped.
pub struct Controller {
    reconciler: Arc<ApplicationReconciler>,
    applications: Arc<dyn ApplicationApi>,
    config: LoopConfig,
    schedule: Schedule,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
    outcomes: Option<mpsc::UnboundedSender<ReconcileOutcome>>,
}

impl Controller {
    /// Create a controller.
    pub fn new(
        reconciler: Arc<ApplicationReconciler>,
        applications: Arc<dyn ApplicationApi>,
        config: LoopConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            applications,
            config,
            schedule: Schedule::new(),
            stop_rx,
            stop_tx,
            outcomes: None,
        }
    }

    /// Forward every pass outcome to `tx`.
    #[must_use]
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<ReconcileOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    /// Run until stopped. Passes in flight when the stop signal arrives are
    /// allowed to finish.
    pub async fn run(&mut self) {
        info!(
            rescan = ?self.config.rescan_interval,
            "Starting controller"
        );

        let mut rescan = tokio::time::interval(self.config.rescan_interval);
        let mut passes: JoinSet<ReconcileOutcome> = JoinSet::new();

        loop {
            let wake = self
                .schedule
                .next_due()
                .unwrap_or_else(|| deadline(Instant::now(), self.config.rescan_interval));

            tokio::select! {
                _ = rescan.tick() => {
                    self.rescan().await;
                    self.start_due(&mut passes);
                }
                () = tokio::time::sleep_until(wake) => {
                    self.start_due(&mut passes);
                }
                Some(joined) = passes.join_next(), if !passes.is_empty() => {
                    match joined {
                        Ok(outcome) => self.finish(outcome),
                        Err(e) => warn!(error = %e, "Reconciliation task failed"),
                    }
                }
                _ = self.stop_rx.changed() => {
                    if *self.stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = passes.len(), "Stopping controller");
        while let Some(joined) = passes.join_next().await {
            if let Ok(outcome) = joined {
                self.finish(outcome);
            }
        }
        info!("Controller stopped");
    }

    async fn rescan(&mut self) {
        match self.applications.list_applications().await {
            Ok(applications) => {
                let keys: Vec<NamespacedName> = applications.iter().map(Application::key).collect();
                debug!(count = keys.len(), "Listed applications");
                self.schedule.observe(&keys, Instant::now());
            }
            Err(e) => warn!(error = %e, "Failed to list applications"),
        }
    }

    fn start_due(&mut self, passes: &mut JoinSet<ReconcileOutcome>) {
        for key in self.schedule.take_due(Instant::now()) {
            let reconciler = Arc::clone(&self.reconciler);
            passes.spawn(async move { reconciler.reconcile(&key).await });
        }
    }

    fn finish(&mut self, outcome: ReconcileOutcome) {
        let delay = self.schedule.complete(
            &outcome.application,
            outcome.next_action,
            &self.config,
            Instant::now(),
        );
        debug!(
            application = %outcome.application,
            next = ?outcome.next_action,
            delay = ?delay,
            failures = self.schedule.failures(&outcome.application),
            "Scheduled next pass"
        );
        if let Some(tx) = &self.outcomes {
            let _ = tx.send(outcome);
        }
    }

    /// Stop the controller.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    #[must_use]
    pub fn stopper(&self) -> ControllerStopper {
        ControllerStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Longest a pass is ever deferred.
const MAX_DELAY: Duration = Duration::from_secs(31_536_000);

/// `delay` after `now`, capped at [`MAX_DELAY`].
fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now)
}

/// Handle to stop a [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerStopper {
    stop_tx: watch::Sender<bool>,
}

impl ControllerStopper {
    /// Stop the controller.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
