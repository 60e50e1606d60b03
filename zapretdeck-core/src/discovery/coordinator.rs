//! Discovery coordinator - drives the probe over the candidate pool
//!
//! One session at a time. The session is all-or-nothing: until a candidate
//! passes, neither the strategy store nor the service is touched, so a
//! cancelled or exhausted run leaves everything exactly as it found it.

use super::probe::{ProbeOutcome, StrategyProbe};
use super::DiscoveryError;
use crate::elevation::PrivilegedExecutor;
use crate::service::ServiceController;
use crate::settings::Settings;
use crate::strategy::{Strategy, StrategyStore};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Progress events streamed to the caller during discovery
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// A candidate is being probed
    Testing {
        id: String,
        index: usize,
        total: usize,
    },
    /// A working strategy was found, selected and the service restarted
    Found { id: String },
    /// Every candidate failed; the previous selection is untouched
    Exhausted,
    /// The session was cancelled before the next candidate
    Cancelled,
    /// The session aborted after a working candidate was found but could not
    /// be applied
    Error(String),
}

/// Transient state for one discovery run; cleared on every exit path.
struct DiscoverySession {
    cancel: Arc<AtomicBool>,
}

/// Orchestrates probing over the candidate pool.
pub struct DiscoveryCoordinator {
    session: Mutex<Option<DiscoverySession>>,
}

impl Default for DiscoveryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryCoordinator {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Cancel the in-flight session, if any. Takes effect before the next
    /// candidate starts.
    pub fn cancel(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            info!("Discovery cancelled");
            session.cancel.store(true, Ordering::Release);
        }
    }

    /// Run discovery over the store's candidate pool in its fixed order.
    ///
    /// Returns the working strategy if one was found and applied. Events are
    /// streamed over `events`; a dropped receiver never aborts the run.
    pub async fn run(
        &self,
        probe: Arc<dyn StrategyProbe>,
        store: Arc<StrategyStore>,
        service: Arc<tokio::sync::Mutex<ServiceController>>,
        executor: Arc<PrivilegedExecutor>,
        settings: Arc<Mutex<Settings>>,
        events: UnboundedSender<DiscoveryEvent>,
    ) -> Result<Option<Strategy>, DiscoveryError> {
        let cancel = {
            let mut session = self.session.lock();
            if session.is_some() {
                return Err(DiscoveryError::AlreadyRunning);
            }
            let cancel = Arc::new(AtomicBool::new(false));
            *session = Some(DiscoverySession {
                cancel: cancel.clone(),
            });
            cancel
        };

        let result = self
            .run_session(probe, store, service, executor, settings, &events, &cancel)
            .await;

        // The session never outlives its run.
        *self.session.lock() = None;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_session(
        &self,
        probe: Arc<dyn StrategyProbe>,
        store: Arc<StrategyStore>,
        service: Arc<tokio::sync::Mutex<ServiceController>>,
        executor: Arc<PrivilegedExecutor>,
        settings: Arc<Mutex<Settings>>,
        events: &UnboundedSender<DiscoveryEvent>,
        cancel: &AtomicBool,
    ) -> Result<Option<Strategy>, DiscoveryError> {
        let candidates: Vec<Strategy> = store.all().iter().cloned().collect();
        if candidates.is_empty() {
            return Err(DiscoveryError::EmptyPool);
        }
        let total = candidates.len();
        info!("Auto-discovery over {} candidates", total);

        for (index, candidate) in candidates.iter().enumerate() {
            if cancel.load(Ordering::Acquire) {
                let _ = events.send(DiscoveryEvent::Cancelled);
                return Ok(None);
            }

            let _ = events.send(DiscoveryEvent::Testing {
                id: candidate.id.clone(),
                index,
                total,
            });
            info!("Probing strategy '{}' ({}/{})", candidate.id, index + 1, total);

            match probe.probe(candidate, cancel).await {
                Ok(ProbeOutcome::Pass) => {
                    info!("Strategy '{}' passed all targets", candidate.id);
                    return self
                        .apply_found(candidate, store, service, executor, settings, events)
                        .await
                        .map(Some);
                }
                Ok(ProbeOutcome::Fail { target, failure }) => {
                    debug!(
                        "Strategy '{}' failed at target {}: {:?}",
                        candidate.id, target, failure
                    );
                }
                Ok(ProbeOutcome::Aborted) => {
                    let _ = events.send(DiscoveryEvent::Cancelled);
                    return Ok(None);
                }
                // An infrastructure error counts as a failed candidate; the
                // next one may still work.
                Err(e) => warn!("Probe error for '{}': {}", candidate.id, e),
            }
        }

        info!("Auto-discovery exhausted {} candidates without success", total);
        let _ = events.send(DiscoveryEvent::Exhausted);
        Ok(None)
    }

    async fn apply_found(
        &self,
        candidate: &Strategy,
        store: Arc<StrategyStore>,
        service: Arc<tokio::sync::Mutex<ServiceController>>,
        executor: Arc<PrivilegedExecutor>,
        settings: Arc<Mutex<Settings>>,
        events: &UnboundedSender<DiscoveryEvent>,
    ) -> Result<Strategy, DiscoveryError> {
        if let Err(e) = store.select(&candidate.id) {
            let _ = events.send(DiscoveryEvent::Error(e.to_string()));
            return Err(DiscoveryError::Selection(e.to_string()));
        }

        let snapshot = settings.lock().clone();
        let mut controller = service.lock().await;
        if let Err(e) = controller.restart(&executor, &snapshot, candidate).await {
            warn!("Restart with discovered strategy failed: {}", e);
            let _ = events.send(DiscoveryEvent::Error(e.to_string()));
            return Err(DiscoveryError::Restart(e.to_string()));
        }

        let _ = events.send(DiscoveryEvent::Found {
            id: candidate.id.clone(),
        });
        Ok(candidate.clone())
    }
}
