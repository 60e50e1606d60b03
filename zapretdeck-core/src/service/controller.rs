//! Service controller - lifecycle state machine for the bypass process
//!
//! All transitions run through `&mut self`, so wrapping the controller in a
//! `tokio::sync::Mutex` gives the process-wide "at most one transition in
//! flight" guarantee.

use super::{ServiceError, ServiceState};
use crate::elevation::{ElevationError, PrivilegedExecutor};
use crate::settings::Settings;
use crate::strategy::Strategy;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use tokio::process::Command;

/// Privileged command surface for the bypass service.
///
/// Defaults reconstruct the installed layout under `/opt/zapretdeck`;
/// everything is overridable so tests and portable installs can substitute
/// their own programs.
#[derive(Debug, Clone)]
pub struct ServiceCommands {
    /// Program that starts the bypass process with a strategy's parameters
    pub launcher: String,
    /// Program that tears down the bypass process and its firewall rules
    pub stopper: String,
    /// systemd unit registered for persist-across-reboot mode
    pub unit: String,
    /// systemctl binary
    pub systemctl: String,
    /// Process name used for liveness detection
    pub process_name: String,
}

impl Default for ServiceCommands {
    fn default() -> Self {
        Self {
            launcher: "/opt/zapretdeck/zapret-launch".to_string(),
            stopper: "/opt/zapretdeck/zapret-stop".to_string(),
            unit: "zapretdeck.service".to_string(),
            systemctl: "systemctl".to_string(),
            process_name: "nfqws".to_string(),
        }
    }
}

impl ServiceCommands {
    /// Build launcher arguments from a strategy profile plus the game filter
    /// flag.
    fn launch_args(&self, strategy: &Strategy, settings: &Settings) -> Vec<String> {
        let mut args = strategy.args.clone();
        if settings.game_filter {
            args.push("--game-filter".to_string());
        }
        args
    }
}

/// stderr patterns meaning "there was nothing to stop"
fn is_not_running_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("not running")
        || lower.contains("no process found")
        || lower.contains("inactive")
}

/// Starts, stops and monitors the background bypass process.
pub struct ServiceController {
    commands: ServiceCommands,
    state: ServiceState,
    subscribers: Vec<Sender<ServiceState>>,
}

impl ServiceController {
    pub fn new(commands: ServiceCommands) -> Self {
        Self {
            commands,
            state: ServiceState::Stopped,
            subscribers: Vec::new(),
        }
    }

    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    pub fn commands(&self) -> &ServiceCommands {
        &self.commands
    }

    /// Subscribe to state transitions. Dropped receivers are pruned on the
    /// next transition.
    pub fn subscribe(&mut self) -> Receiver<ServiceState> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn set_state(&mut self, next: ServiceState) {
        debug!("Service state: {:?} -> {:?}", self.state, next);
        self.state = next;
        let state = self.state.clone();
        self.subscribers.retain(|tx| tx.send(state.clone()).is_ok());
    }

    /// Start the bypass process with the selected strategy.
    ///
    /// Allowed from `Stopped` and `Failed`. A non-zero launcher exit moves
    /// the state to `Failed` and surfaces the command's failure text.
    pub async fn start(
        &mut self,
        executor: &PrivilegedExecutor,
        settings: &Settings,
        strategy: &Strategy,
    ) -> Result<(), ServiceError> {
        if self.state.is_running() {
            return Err(ServiceError::AlreadyRunning);
        }
        if self.state.is_transitioning() {
            return Err(ServiceError::TransitionInFlight);
        }

        self.set_state(ServiceState::Starting);

        // Pre-start cleanup: the stopper is idempotent and a failure here
        // only means there was nothing to clean.
        if let Err(e) = executor.run(&self.commands.stopper, &[]).await {
            debug!("Pre-start cleanup skipped: {}", e);
        }

        let args = self.commands.launch_args(strategy, settings);
        match executor.run(&self.commands.launcher, &args).await {
            Ok(_) => {
                info!("Bypass service running with strategy '{}'", strategy.id);
                self.set_state(ServiceState::Running);
                Ok(())
            }
            Err(ElevationError::ExecutionFailed { command, stderr }) => {
                warn!("Service start failed: {}: {}", command, stderr);
                self.set_state(ServiceState::Failed(stderr.clone()));
                Err(ServiceError::Start { command, stderr })
            }
            Err(e) => {
                self.set_state(ServiceState::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Stop the bypass process.
    ///
    /// Idempotent: stopping an already-stopped service succeeds without
    /// touching the executor.
    pub async fn stop(&mut self, executor: &PrivilegedExecutor) -> Result<(), ServiceError> {
        if self.state == ServiceState::Stopped {
            debug!("Service already stopped");
            return Ok(());
        }
        if self.state.is_transitioning() {
            return Err(ServiceError::TransitionInFlight);
        }

        self.set_state(ServiceState::Stopping);

        match executor.run(&self.commands.stopper, &[]).await {
            Ok(_) => {
                info!("Bypass service stopped");
                self.set_state(ServiceState::Stopped);
                Ok(())
            }
            Err(ElevationError::ExecutionFailed { stderr, .. })
                if is_not_running_error(&stderr) =>
            {
                // Nothing was running; that is what stop is for.
                debug!("Stop found no live process: {}", stderr);
                self.set_state(ServiceState::Stopped);
                Ok(())
            }
            Err(ElevationError::ExecutionFailed { command, stderr }) => {
                warn!("Service stop failed: {}: {}", command, stderr);
                self.set_state(ServiceState::Failed(stderr.clone()));
                Err(ServiceError::Stop { command, stderr })
            }
            Err(e) => {
                self.set_state(ServiceState::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Stop, then start with the given strategy.
    ///
    /// A failed stop aborts the restart: the stop error is surfaced and the
    /// start phase never runs.
    pub async fn restart(
        &mut self,
        executor: &PrivilegedExecutor,
        settings: &Settings,
        strategy: &Strategy,
    ) -> Result<(), ServiceError> {
        self.stop(executor).await?;
        self.start(executor, settings, strategy).await
    }

    /// Register or deregister the systemd unit that persists the bypass
    /// across reboots.
    ///
    /// Registration itself is independent of the live process. While the
    /// service is running the new registration is applied in the middle of
    /// exactly one stop/start cycle so the live process picks it up; while
    /// stopped it is applied in place.
    pub async fn set_background_mode(
        &mut self,
        executor: &PrivilegedExecutor,
        enabled: bool,
        settings: &Settings,
        strategy: Option<&Strategy>,
    ) -> Result<(), ServiceError> {
        let was_running = self.state.is_running();
        if was_running {
            self.stop(executor).await?;
        }

        let action = if enabled { "enable" } else { "disable" };
        let args = vec![action.to_string(), self.commands.unit.clone()];
        match executor.run(&self.commands.systemctl, &args).await {
            Ok(_) => {}
            Err(ElevationError::ExecutionFailed { command, stderr }) => {
                return Err(ServiceError::Background { command, stderr });
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            "Background mode {} for {}",
            if enabled { "enabled" } else { "disabled" },
            self.commands.unit
        );

        if was_running {
            let strategy = strategy.ok_or(ServiceError::NoStrategy)?;
            self.start(executor, settings, strategy).await?;
        }
        Ok(())
    }

    /// Reconcile the state machine with an externally observed liveness
    /// answer. Used at startup, when a previous session or the systemd unit
    /// may already be running the bypass.
    ///
    /// Only the steady states are touched; transitions and `Failed` are left
    /// for their owners.
    pub fn resync(&mut self, alive: bool) {
        match (&self.state, alive) {
            (ServiceState::Stopped, true) => {
                info!("Found live bypass process, resyncing to Running");
                self.set_state(ServiceState::Running);
            }
            (ServiceState::Running, false) => {
                info!("Bypass process gone, resyncing to Stopped");
                self.set_state(ServiceState::Stopped);
            }
            _ => {}
        }
    }

    /// Probe for a live bypass process (unprivileged) and resync.
    pub async fn detect_running(&mut self) -> bool {
        let alive = process_alive(&self.commands.process_name).await;
        self.resync(alive);
        alive
    }
}

/// Unprivileged liveness probe for the bypass process.
async fn process_alive(name: &str) -> bool {
    match Command::new("pgrep").arg("-f").arg(name).output().await {
        Ok(output) => output.status.success(),
        Err(e) => {
            debug!("pgrep unavailable: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::PrivilegedExecutor;
    use crate::test_support::{test_commands, test_strategy, ScriptedRunner};
    use std::sync::Arc;

    async fn executor(runner: &Arc<ScriptedRunner>) -> PrivilegedExecutor {
        PrivilegedExecutor::authorize(runner.clone(), "pw")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_runs_cleanup_then_launcher() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = executor(&runner).await;
        let mut controller = ServiceController::new(test_commands());
        let settings = Settings::default();
        let strategy = test_strategy("general");

        controller.start(&executor, &settings, &strategy).await.unwrap();

        assert_eq!(*controller.state(), ServiceState::Running);
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], "zapret-stop");
        assert!(calls[1].starts_with("zapret-launch --qnum=200"));
    }

    #[tokio::test]
    async fn test_start_appends_game_filter_flag() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = executor(&runner).await;
        let mut controller = ServiceController::new(test_commands());
        let mut settings = Settings::default();
        settings.game_filter = true;

        controller
            .start(&executor, &settings, &test_strategy("general"))
            .await
            .unwrap();

        assert!(runner.calls()[1].ends_with("--game-filter"));
    }

    #[tokio::test]
    async fn test_start_failure_moves_to_failed() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail_program("zapret-launch", "cannot bind queue");
        let executor = executor(&runner).await;
        let mut controller = ServiceController::new(test_commands());

        let err = controller
            .start(&executor, &Settings::default(), &test_strategy("general"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Start { .. }));
        assert_eq!(
            *controller.state(),
            ServiceState::Failed("cannot bind queue".to_string())
        );
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = executor(&runner).await;
        let mut controller = ServiceController::new(test_commands());
        let settings = Settings::default();
        let strategy = test_strategy("general");

        controller.start(&executor, &settings, &strategy).await.unwrap();
        let err = controller.start(&executor, &settings, &strategy).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_stop_on_stopped_never_touches_executor() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = executor(&runner).await;
        let mut controller = ServiceController::new(test_commands());

        controller.stop(&executor).await.unwrap();

        assert_eq!(*controller.state(), ServiceState::Stopped);
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_treats_dead_process_as_success() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = executor(&runner).await;
        let mut controller = ServiceController::new(test_commands());
        controller
            .start(&executor, &Settings::default(), &test_strategy("general"))
            .await
            .unwrap();

        runner.fail_program("zapret-stop", "nfqws: no process found");
        controller.stop(&executor).await.unwrap();
        assert_eq!(*controller.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_aborts_when_stop_fails() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = executor(&runner).await;
        let mut controller = ServiceController::new(test_commands());
        let settings = Settings::default();
        let strategy = test_strategy("general");

        controller.start(&executor, &settings, &strategy).await.unwrap();
        let launches_before = runner.count_program("zapret-launch");

        runner.fail_program("zapret-stop", "nft ruleset busy");
        let err = controller.restart(&executor, &settings, &strategy).await.unwrap_err();

        assert!(matches!(err, ServiceError::Stop { .. }));
        assert!(matches!(controller.state(), ServiceState::Failed(_)));
        // The start phase never ran.
        assert_eq!(runner.count_program("zapret-launch"), launches_before);
    }

    #[tokio::test]
    async fn test_set_background_mode_while_running_is_one_cycle() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = executor(&runner).await;
        let mut controller = ServiceController::new(test_commands());
        let settings = Settings::default();
        let strategy = test_strategy("general");

        let state_rx = controller.subscribe();
        controller.start(&executor, &settings, &strategy).await.unwrap();

        controller
            .set_background_mode(&executor, true, &settings, Some(&strategy))
            .await
            .unwrap();

        assert_eq!(*controller.state(), ServiceState::Running);
        assert!(runner.calls().contains(&"systemctl enable zapretdeck.service".to_string()));

        // Exactly one restart cycle after the initial start.
        let transitions: Vec<ServiceState> = state_rx.try_iter().collect();
        assert_eq!(
            transitions,
            vec![
                ServiceState::Starting,
                ServiceState::Running,
                ServiceState::Stopping,
                ServiceState::Stopped,
                ServiceState::Starting,
                ServiceState::Running,
            ]
        );
    }

    #[tokio::test]
    async fn test_set_background_mode_while_stopped_applies_in_place() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = executor(&runner).await;
        let mut controller = ServiceController::new(test_commands());

        controller
            .set_background_mode(&executor, false, &Settings::default(), None)
            .await
            .unwrap();

        assert_eq!(*controller.state(), ServiceState::Stopped);
        assert_eq!(runner.calls(), vec!["systemctl disable zapretdeck.service"]);
    }

    #[tokio::test]
    async fn test_resync_only_touches_steady_states() {
        let mut controller = ServiceController::new(test_commands());

        controller.resync(true);
        assert_eq!(*controller.state(), ServiceState::Running);
        controller.resync(false);
        assert_eq!(*controller.state(), ServiceState::Stopped);

        controller.set_state(ServiceState::Failed("x".to_string()));
        controller.resync(true);
        assert!(matches!(controller.state(), ServiceState::Failed(_)));
    }

    #[test]
    fn test_not_running_error_patterns() {
        assert!(is_not_running_error("nfqws: no process found"));
        assert!(is_not_running_error("Unit zapretdeck.service is inactive"));
        assert!(!is_not_running_error("nft ruleset busy"));
    }
}
