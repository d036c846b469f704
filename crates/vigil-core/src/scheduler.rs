//! Cancellable background verification cycle.
//!
//! At most one cycle is active per scheduler. The cycle checks integrity,
//! reports over an event channel, and sleeps interruptibly between rounds.
//! A detected violation halts the cycle rather than rescheduling it: once a
//! breach is on record, automated checking stays down until someone re-arms
//! it.

use crate::cancel::CancelToken;
use crate::models::Classification;
use crate::verify::Verifier;
use crate::{MonitorError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Why a cycle stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    User,
    Violation,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Violation => "violation",
        }
    }
}

/// Events emitted by the background cycle.
///
/// Consumers receive these over the channel passed to [`Scheduler::start`]
/// and marshal them onto their own thread as needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A check round finished with no violations
    CycleCompleted { results: HashMap<String, Classification> },
    /// At least one resource failed verification; the cycle halts
    ViolationDetected { count: usize, paths: Vec<String> },
    /// The cycle loop has exited
    SchedulerStopped { reason: StopReason },
}

/// Outcome of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    Started,
    /// A cycle was already live; nothing was changed
    AlreadyRunning,
}

/// Owns the lifecycle of the background check cycle.
///
/// `start` must be called from within a tokio runtime.
pub struct Scheduler {
    verifier: Arc<Verifier>,
    cycle: Mutex<Option<CycleHandle>>,
}

struct CycleHandle {
    shutdown_tx: watch::Sender<bool>,
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(verifier: Arc<Verifier>) -> Self {
        Self { verifier, cycle: Mutex::new(None) }
    }

    /// Start the background cycle.
    ///
    /// Rejects a zero interval. A second start while a cycle is live is a
    /// reported no-op: the existing cycle keeps running untouched.
    pub fn start(
        &self,
        interval: Duration,
        events: mpsc::Sender<MonitorEvent>,
    ) -> Result<StartStatus> {
        if interval.is_zero() {
            return Err(MonitorError::InvalidInterval);
        }

        let mut cycle = self.cycle.lock();
        if let Some(handle) = cycle.as_ref() {
            if !handle.task.is_finished() {
                info!("background check already running, start ignored");
                return Ok(StartStatus::AlreadyRunning);
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cancel = CancelToken::new();
        let task = tokio::spawn(run_cycle(
            self.verifier.clone(),
            interval,
            shutdown_rx,
            cancel.clone(),
            events,
        ));
        *cycle = Some(CycleHandle { shutdown_tx, cancel, task });

        info!(interval_secs = interval.as_secs(), "background check started");
        Ok(StartStatus::Started)
    }

    /// Stop the background cycle.
    ///
    /// Wakes the inter-cycle sleep immediately and cancels a check batch in
    /// flight. Idempotent: stopping an idle scheduler is a no-op. The
    /// scheduler reports running until the loop has fully exited, so a
    /// follow-up start cannot overlap the draining cycle.
    pub fn stop(&self) {
        let cycle = self.cycle.lock();
        if let Some(handle) = cycle.as_ref() {
            if !handle.task.is_finished() {
                info!("background check stop requested");
                handle.cancel.cancel();
                let _ = handle.shutdown_tx.send(true);
            }
        }
    }

    /// Whether a cycle is currently live
    pub fn is_running(&self) -> bool {
        self.cycle.lock().as_ref().map_or(false, |handle| !handle.task.is_finished())
    }
}

async fn run_cycle(
    verifier: Arc<Verifier>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    cancel: CancelToken,
    events: mpsc::Sender<MonitorEvent>,
) {
    let reason = loop {
        if *shutdown_rx.borrow() {
            break StopReason::User;
        }

        match verifier.check_integrity(&cancel) {
            Ok(results) => {
                // A stop that arrived mid-check wins over its partial results.
                if *shutdown_rx.borrow() {
                    break StopReason::User;
                }

                let mut failed: Vec<String> = results
                    .iter()
                    .filter(|(_, c)| **c == Classification::Failed)
                    .map(|(path, _)| path.clone())
                    .collect();

                if !failed.is_empty() {
                    failed.sort();
                    error!(count = failed.len(), "integrity violation detected, halting background check");
                    let _ = events
                        .send(MonitorEvent::ViolationDetected { count: failed.len(), paths: failed })
                        .await;
                    break StopReason::Violation;
                }

                let _ = events.send(MonitorEvent::CycleCompleted { results }).await;
            }
            Err(err) => {
                error!(error = %err, "integrity check failed, retrying next cycle");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    };

    info!(reason = reason.as_str(), "background check stopped");
    let _ = events.send(MonitorEvent::SchedulerStopped { reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Resource, ResourceKind};
    use crate::registry::Registry;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const EVENT_WAIT: Duration = Duration::from_secs(10);

    fn fixture() -> (TempDir, Arc<Registry>, Scheduler) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::open_in_memory().unwrap());
        let verifier = Arc::new(Verifier::new(registry.clone()));
        let scheduler = Scheduler::new(verifier);
        (dir, registry, scheduler)
    }

    fn register_file(registry: &Registry, dir: &TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        let path = path.to_string_lossy().to_string();
        registry
            .insert(&Resource {
                path: path.clone(),
                name: name.to_string(),
                kind: ResourceKind::File,
                added_at: Utc::now(),
                baseline_hash: None,
                baseline_checked_at: None,
            })
            .unwrap();
        path
    }

    async fn wait_until_idle(scheduler: &Scheduler) {
        timeout(EVENT_WAIT, async {
            while scheduler.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduler did not go idle");
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let (_dir, _registry, scheduler) = fixture();
        let (tx, _rx) = mpsc::channel(16);

        let err = scheduler.start(Duration::ZERO, tx).unwrap_err();
        assert!(matches!(err, MonitorError::InvalidInterval));
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn second_start_is_a_reported_noop() {
        let (_dir, _registry, scheduler) = fixture();
        let (tx, mut rx) = mpsc::channel(16);

        assert_eq!(scheduler.start(Duration::from_secs(3600), tx.clone()).unwrap(), StartStatus::Started);
        assert_eq!(scheduler.start(Duration::from_secs(3600), tx).unwrap(), StartStatus::AlreadyRunning);

        // The first cycle is unaffected and completes its round.
        let event = timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, MonitorEvent::CycleCompleted { .. }));

        scheduler.stop();
        wait_until_idle(&scheduler).await;
    }

    #[tokio::test]
    async fn stop_wakes_the_sleep_immediately() {
        let (_dir, _registry, scheduler) = fixture();
        let (tx, mut rx) = mpsc::channel(16);

        scheduler.start(Duration::from_secs(3600), tx).unwrap();
        let event = timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, MonitorEvent::CycleCompleted { .. }));

        // The cycle is now asleep for an hour; stop must not wait for it.
        scheduler.stop();
        let event = timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, MonitorEvent::SchedulerStopped { reason: StopReason::User }));

        wait_until_idle(&scheduler).await;

        // Stopping again while idle is a no-op.
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn violation_halts_the_cycle_and_allows_a_restart() {
        let (dir, registry, scheduler) = fixture();
        let path = register_file(&registry, &dir, "a.txt", "aaa");

        let verifier = Verifier::new(registry.clone());
        verifier.update_baselines(&CancelToken::new()).unwrap();
        fs::write(&path, "tampered").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        scheduler.start(Duration::from_millis(50), tx).unwrap();

        let event = timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap();
        match event {
            MonitorEvent::ViolationDetected { count, paths } => {
                assert_eq!(count, 1);
                assert_eq!(paths, vec![path.clone()]);
            }
            other => panic!("expected violation, got {other:?}"),
        }

        let event = timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, MonitorEvent::SchedulerStopped { reason: StopReason::Violation }));
        wait_until_idle(&scheduler).await;

        // The terminal state is gone; a fresh start is accepted.
        let (tx, mut rx) = mpsc::channel(16);
        assert_eq!(scheduler.start(Duration::from_millis(50), tx).unwrap(), StartStatus::Started);
        let event = timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, MonitorEvent::ViolationDetected { .. }));
        wait_until_idle(&scheduler).await;
    }

    #[tokio::test]
    async fn clean_cycles_keep_reporting() {
        let (dir, registry, scheduler) = fixture();
        register_file(&registry, &dir, "a.txt", "aaa");

        let verifier = Verifier::new(registry.clone());
        verifier.update_baselines(&CancelToken::new()).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        scheduler.start(Duration::from_millis(20), tx).unwrap();

        for _ in 0..3 {
            let event = timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap();
            match event {
                MonitorEvent::CycleCompleted { results } => {
                    assert_eq!(results.len(), 1);
                    assert!(results.values().all(|c| *c == Classification::Passed));
                }
                other => panic!("expected completed cycle, got {other:?}"),
            }
        }

        scheduler.stop();
        wait_until_idle(&scheduler).await;
    }
}
