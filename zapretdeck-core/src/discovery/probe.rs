//! Strategy probing - reachability checks against live targets
//!
//! A candidate passes only when every configured target answers within its
//! timeout while the candidate's bypass parameters are applied to a
//! throwaway trial instance.

use crate::elevation::PrivilegedExecutor;
use crate::service::ServiceCommands;
use crate::strategy::Strategy;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default per-target timeout
pub const DEFAULT_TARGET_TIMEOUT: Duration = Duration::from_secs(5);

/// A reachability target the bypass must unlock
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub name: String,
    pub url: String,
}

impl ProbeTarget {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

/// The endpoints the bypass exists for.
pub fn default_targets() -> Vec<ProbeTarget> {
    vec![
        ProbeTarget::new("YouTube", "https://www.youtube.com"),
        ProbeTarget::new("Discord", "https://discord.com"),
    ]
}

/// Why a single target was declared unreachable
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeFailure {
    Timeout,
    Rejected(String),
}

/// Result of probing one candidate strategy
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// All targets reachable within their timeout
    Pass,
    /// First unreachable target and why
    Fail {
        target: String,
        failure: ProbeFailure,
    },
    /// Cancelled between targets
    Aborted,
}

/// Seam between the coordinator and the concrete probing mechanism.
#[async_trait]
pub trait StrategyProbe: Send + Sync {
    /// Probe one candidate. Implementations must check `cancel` between
    /// targets (not mid-target) and report [`ProbeOutcome::Aborted`] when it
    /// is set.
    async fn probe(
        &self,
        strategy: &Strategy,
        cancel: &AtomicBool,
    ) -> Result<ProbeOutcome, String>;
}

/// Probes a candidate by applying it to a throwaway trial instance and
/// fetching each target over HTTPS.
pub struct HttpProbe {
    executor: Arc<PrivilegedExecutor>,
    commands: ServiceCommands,
    client: reqwest::Client,
    targets: Vec<ProbeTarget>,
    target_timeout: Duration,
}

impl HttpProbe {
    pub fn new(executor: Arc<PrivilegedExecutor>, commands: ServiceCommands) -> Self {
        Self {
            executor,
            commands,
            client: reqwest::Client::builder()
                .user_agent("ZapretDeck-Probe")
                .timeout(DEFAULT_TARGET_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            targets: default_targets(),
            target_timeout: DEFAULT_TARGET_TIMEOUT,
        }
    }

    pub fn with_targets(mut self, targets: Vec<ProbeTarget>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_target_timeout(mut self, timeout: Duration) -> Self {
        self.target_timeout = timeout;
        self
    }

    async fn fetch_target(&self, target: &ProbeTarget) -> Result<(), ProbeFailure> {
        let response = self
            .client
            .get(&target.url)
            .timeout(self.target_timeout)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(ProbeFailure::Rejected(format!("HTTP {}", resp.status()))),
            Err(e) if e.is_timeout() => Err(ProbeFailure::Timeout),
            Err(e) => Err(ProbeFailure::Rejected(e.to_string())),
        }
    }

    async fn run_targets(&self, cancel: &AtomicBool) -> ProbeOutcome {
        for target in &self.targets {
            if cancel.load(Ordering::Acquire) {
                return ProbeOutcome::Aborted;
            }
            match self.fetch_target(target).await {
                Ok(()) => debug!("Target {} reachable", target.name),
                Err(failure) => {
                    info!("Target {} unreachable: {:?}", target.name, failure);
                    return ProbeOutcome::Fail {
                        target: target.name.clone(),
                        failure,
                    };
                }
            }
        }
        ProbeOutcome::Pass
    }
}

#[async_trait]
impl StrategyProbe for HttpProbe {
    async fn probe(
        &self,
        strategy: &Strategy,
        cancel: &AtomicBool,
    ) -> Result<ProbeOutcome, String> {
        debug!("Applying trial instance for strategy '{}'", strategy.id);
        self.executor
            .run(&self.commands.launcher, &strategy.args)
            .await
            .map_err(|e| format!("Trial launch failed: {}", e))?;

        let outcome = self.run_targets(cancel).await;

        // Tear the trial down on every exit path, including Fail/Aborted;
        // a candidate must never stay half-applied.
        if let Err(e) = self.executor.run(&self.commands.stopper, &[]).await {
            warn!("Trial cleanup failed: {}", e);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_commands, test_strategy, ScriptedRunner};

    #[tokio::test]
    async fn test_probe_applies_and_cleans_trial() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = Arc::new(
            PrivilegedExecutor::authorize(runner.clone(), "pw")
                .await
                .unwrap(),
        );
        // No targets: the trial lifecycle alone is under test here.
        let probe = HttpProbe::new(executor, test_commands()).with_targets(vec![]);

        let cancel = AtomicBool::new(false);
        let outcome = probe.probe(&test_strategy("general"), &cancel).await.unwrap();

        assert_eq!(outcome, ProbeOutcome::Pass);
        let calls = runner.calls();
        assert!(calls[0].starts_with("zapret-launch"));
        assert_eq!(calls.last().unwrap(), "zapret-stop");
    }

    #[tokio::test]
    async fn test_probe_cancelled_before_first_target() {
        let runner = Arc::new(ScriptedRunner::new());
        let executor = Arc::new(
            PrivilegedExecutor::authorize(runner.clone(), "pw")
                .await
                .unwrap(),
        );
        let probe = HttpProbe::new(executor, test_commands())
            .with_targets(vec![ProbeTarget::new("X", "https://example.invalid")]);

        let cancel = AtomicBool::new(true);
        let outcome = probe.probe(&test_strategy("general"), &cancel).await.unwrap();

        assert_eq!(outcome, ProbeOutcome::Aborted);
        // The trial was still cleaned up.
        assert_eq!(runner.calls().last().unwrap(), "zapret-stop");
    }

    #[tokio::test]
    async fn test_probe_trial_launch_failure_is_an_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail_program("zapret-launch", "queue busy");
        let executor = Arc::new(
            PrivilegedExecutor::authorize(runner.clone(), "pw")
                .await
                .unwrap(),
        );
        let probe = HttpProbe::new(executor, test_commands()).with_targets(vec![]);

        let cancel = AtomicBool::new(false);
        let err = probe.probe(&test_strategy("general"), &cancel).await.unwrap_err();
        assert!(err.contains("Trial launch failed"));
    }

    #[test]
    fn test_default_targets() {
        let targets = default_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "YouTube");
        assert_eq!(targets[1].name, "Discord");
    }
}
