//! Shared core state and serialized operations
//!
//! The single coordination point between the frontend and the subsystems.
//! The service controller lives behind one `tokio::sync::Mutex`, which is
//! what keeps at most one lifecycle transition in flight; sync-only state
//! (settings, strategy store) uses `parking_lot`.

use crate::discovery::{DiscoveryCoordinator, DiscoveryError, DiscoveryEvent, HttpProbe, StrategyProbe};
use crate::elevation::{CommandRunner, ElevationError, PrivilegedExecutor};
use crate::service::{ServiceCommands, ServiceController, ServiceError, ServiceState};
use crate::settings::{self, Settings};
use crate::strategy::{StrategyError, StrategySet, StrategyStore};
use crate::updater::{UpdateChecker, UpdateState};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Errors surfaced by the high-level operations
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Elevation(#[from] ElevationError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Failed to persist settings: {0}")]
    Settings(String),
}

/// Shared application core managed by the frontend
pub struct CoreState {
    pub service: Arc<tokio::sync::Mutex<ServiceController>>,
    pub strategies: Arc<StrategyStore>,
    pub settings: Arc<Mutex<Settings>>,
    pub discovery: Arc<DiscoveryCoordinator>,
    executor: Arc<tokio::sync::Mutex<Option<Arc<PrivilegedExecutor>>>>,
    commands: ServiceCommands,
    runner: Arc<dyn CommandRunner>,
    settings_path: Option<PathBuf>,
}

impl CoreState {
    /// Build the core over a loaded candidate pool, using the default
    /// settings location.
    pub fn new(set: StrategySet, commands: ServiceCommands, runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_settings_path(set, commands, runner, None)
    }

    /// Build the core with an explicit settings file (tests, portable
    /// installs).
    pub fn with_settings_path(
        set: StrategySet,
        commands: ServiceCommands,
        runner: Arc<dyn CommandRunner>,
        settings_path: Option<PathBuf>,
    ) -> Self {
        let loaded = match &settings_path {
            Some(path) => settings::load_settings_from(path),
            None => settings::load_settings(),
        };
        let settings = Arc::new(Mutex::new(loaded));
        let strategies = Arc::new(StrategyStore::new(
            set,
            settings.clone(),
            settings_path.clone(),
        ));

        Self {
            service: Arc::new(tokio::sync::Mutex::new(ServiceController::new(
                commands.clone(),
            ))),
            strategies,
            settings,
            discovery: Arc::new(DiscoveryCoordinator::new()),
            executor: Arc::new(tokio::sync::Mutex::new(None)),
            commands,
            runner,
            settings_path,
        }
    }

    fn persist_settings(&self) -> Result<(), CoreError> {
        let settings = self.settings.lock();
        let result = match &self.settings_path {
            Some(path) => settings::save_settings_to(path, &settings),
            None => settings::save_settings(&settings),
        };
        result.map_err(CoreError::Settings)
    }

    /// Validate the elevation secret and keep the executor for subsequent
    /// privileged calls.
    pub async fn authorize(&self, secret: &str) -> Result<(), ElevationError> {
        let executor = PrivilegedExecutor::authorize(self.runner.clone(), secret).await?;
        *self.executor.lock().await = Some(Arc::new(executor));
        Ok(())
    }

    /// Whether a validated credential is held.
    pub async fn is_authorized(&self) -> bool {
        self.executor.lock().await.is_some()
    }

    /// Drop the held credential; privileged operations fail until the next
    /// [`authorize`](Self::authorize).
    pub async fn invalidate_credential(&self) {
        if let Some(executor) = self.executor.lock().await.take() {
            if let Ok(executor) = Arc::try_unwrap(executor) {
                executor.invalidate();
            }
        }
    }

    async fn executor(&self) -> Result<Arc<PrivilegedExecutor>, ServiceError> {
        self.executor
            .lock()
            .await
            .clone()
            .ok_or(ServiceError::NotAuthorized)
    }

    /// Current service state.
    pub async fn service_state(&self) -> ServiceState {
        self.service.lock().await.state().clone()
    }

    /// Subscribe to service state transitions.
    pub async fn subscribe_service(&self) -> crossbeam_channel::Receiver<ServiceState> {
        self.service.lock().await.subscribe()
    }

    /// Start the bypass with the selected strategy and current settings.
    pub async fn start_service(&self) -> Result<(), CoreError> {
        let executor = self.executor().await?;
        let strategy = self
            .strategies
            .current()
            .ok_or(ServiceError::NoStrategy)?;
        let snapshot = self.settings.lock().clone();
        self.service
            .lock()
            .await
            .start(&executor, &snapshot, &strategy)
            .await?;
        Ok(())
    }

    /// Stop the bypass. Stopping an already-stopped service succeeds.
    pub async fn stop_service(&self) -> Result<(), CoreError> {
        let executor = self.executor().await?;
        self.service.lock().await.stop(&executor).await?;
        Ok(())
    }

    /// Stop, then start with the selected strategy.
    pub async fn restart_service(&self) -> Result<(), CoreError> {
        let executor = self.executor().await?;
        let strategy = self
            .strategies
            .current()
            .ok_or(ServiceError::NoStrategy)?;
        let snapshot = self.settings.lock().clone();
        self.service
            .lock()
            .await
            .restart(&executor, &snapshot, &strategy)
            .await?;
        Ok(())
    }

    /// Select a strategy by id; when the selection actually changed and the
    /// service is live, apply it with one restart.
    pub async fn select_strategy(&self, id: &str) -> Result<(), CoreError> {
        let changed = self
            .strategies
            .current()
            .map(|current| current.id != id)
            .unwrap_or(true);

        let strategy = self.strategies.select(id)?;
        if !changed {
            debug!("Strategy '{}' already selected", id);
            return Ok(());
        }

        if self.service_state().await.is_running() {
            info!("Applying new strategy '{}' (restarting service)", id);
            let executor = self.executor().await?;
            let snapshot = self.settings.lock().clone();
            self.service
                .lock()
                .await
                .restart(&executor, &snapshot, &strategy)
                .await?;
        }
        Ok(())
    }

    /// Persist the game filter flag; when it changed while the service is
    /// live, apply it with one restart.
    pub async fn set_game_filter(&self, enabled: bool) -> Result<(), CoreError> {
        let changed = {
            let mut settings = self.settings.lock();
            if settings.game_filter == enabled {
                false
            } else {
                settings.game_filter = enabled;
                true
            }
        };
        if !changed {
            return Ok(());
        }
        self.persist_settings()?;
        info!("Game filter {}", if enabled { "enabled" } else { "disabled" });

        if self.service_state().await.is_running() {
            let executor = self.executor().await?;
            let strategy = self
                .strategies
                .current()
                .ok_or(ServiceError::NoStrategy)?;
            let snapshot = self.settings.lock().clone();
            self.service
                .lock()
                .await
                .restart(&executor, &snapshot, &strategy)
                .await?;
        }
        Ok(())
    }

    /// Register or deregister the boot-time service and persist the flag.
    pub async fn set_background_mode(&self, enabled: bool) -> Result<(), CoreError> {
        let executor = self.executor().await?;
        let strategy = self.strategies.current();
        let snapshot = self.settings.lock().clone();

        self.service
            .lock()
            .await
            .set_background_mode(&executor, enabled, &snapshot, strategy.as_ref())
            .await?;

        self.settings.lock().background_service = enabled;
        self.persist_settings()
    }

    /// Start auto-discovery as a background task.
    ///
    /// The running service is stopped first so the trial instances own the
    /// network path; progress arrives on the returned channel.
    pub async fn start_discovery(&self) -> Result<UnboundedReceiver<DiscoveryEvent>, CoreError> {
        if self.discovery.is_running() {
            return Err(DiscoveryError::AlreadyRunning.into());
        }
        let executor = self.executor().await?;

        {
            let mut service = self.service.lock().await;
            if service.state().is_running() {
                service.stop(&executor).await.map_err(CoreError::Service)?;
            }
        }

        let probe: Arc<dyn StrategyProbe> =
            Arc::new(HttpProbe::new(executor.clone(), self.commands.clone()));
        let (tx, rx) = unbounded_channel();

        let coordinator = self.discovery.clone();
        let store = self.strategies.clone();
        let service = self.service.clone();
        let settings = self.settings.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator
                .run(probe, store, service, executor, settings, tx)
                .await
            {
                warn!("Discovery failed: {}", e);
            }
        });

        Ok(rx)
    }

    /// Cancel the in-flight discovery session, if any.
    pub fn cancel_discovery(&self) {
        self.discovery.cancel();
    }

    /// Check for a newer release. Failures are non-fatal and reported as
    /// [`UpdateState::Failed`].
    pub async fn check_for_update(&self) -> UpdateState {
        let checker = match UpdateChecker::new() {
            Some(checker) => checker,
            None => return UpdateState::Failed("invalid local version".to_string()),
        };

        match checker.check_latest().await {
            Ok(Some(info)) => UpdateState::Available(info),
            Ok(None) => UpdateState::UpToDate,
            Err(e) => {
                debug!("Update check failed: {}", e);
                UpdateState::Failed(e)
            }
        }
    }

    /// Reconcile the state machine with a live process left over from a
    /// previous session or started by the boot-time unit.
    pub async fn startup_resync(&self) -> bool {
        self.service.lock().await.detect_running().await
    }
}
