//! Game process supervision
//!
//! Push `game-state` events are authoritative. A slow poll of
//! `is_process_running` covers a lost `stopped` event. Both stop paths
//! converge on the same reset, so they may arrive in any order or twice.

use crate::backend::{accepted, ExecutionBackend};
use hylaunch_core::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// Launch signal seen, no process confirmation yet
    Assumed,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    #[default]
    Idle,
    Running { confirmation: Confirmation },
    Stopped { exit_code: Option<i32> },
}

/// Non-zero exit with the log tail at that moment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub exit_code: i32,
    pub log_excerpt: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StopOutcome {
    /// The game was considered running before this stop
    pub was_running: bool,
    pub exit_code: Option<i32>,
    pub crash: Option<CrashReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Skipped,
    StillRunning,
    Stopped,
}

#[derive(Debug)]
pub struct LaunchSupervisor {
    state: RunState,
    /// Incremented for every launch session
    epoch: u64,
    stop_confirmed_epoch: Option<u64>,
    classified_epoch: Option<u64>,
    assumed_at: Option<Instant>,
    recent_log_lines: usize,
}

impl LaunchSupervisor {
    pub fn new(recent_log_lines: usize) -> Self {
        Self {
            state: RunState::Idle,
            epoch: 0,
            stop_confirmed_epoch: None,
            classified_epoch: None,
            assumed_at: None,
            recent_log_lines,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running { .. })
    }

    pub fn should_poll(&self) -> bool {
        self.is_running()
    }

    /// New launch session: earlier stop confirmations no longer apply
    pub fn begin_session(&mut self) -> u64 {
        self.epoch += 1;
        log::debug!("Launch session epoch {}", self.epoch);
        self.epoch
    }

    /// Optimistic running from the launch progress signal
    pub fn assume_running(&mut self) -> bool {
        if self.stop_confirmed_epoch == Some(self.epoch) {
            log::debug!("Ignoring stale launch signal: epoch {} already stopped", self.epoch);
            return false;
        }
        match self.state {
            RunState::Running {
                confirmation: Confirmation::Confirmed,
            } => {
                log::debug!("Launch signal after confirmation, keeping confirmed state");
                false
            }
            _ => {
                self.state = RunState::Running {
                    confirmation: Confirmation::Assumed,
                };
                self.assumed_at = Some(Instant::now());
                true
            }
        }
    }

    pub fn on_started(&mut self) {
        if self.stop_confirmed_epoch == Some(self.epoch) {
            // Процесс запущен вне сессии лаунчера или после повторного запуска
            self.epoch += 1;
        }
        log::info!("Game process started (epoch {})", self.epoch);
        self.state = RunState::Running {
            confirmation: Confirmation::Confirmed,
        };
        self.assumed_at = None;
    }

    /// Push `stopped`. Classifies a crash at most once per session.
    pub async fn on_stopped(
        &mut self,
        backend: &dyn ExecutionBackend,
        exit_code: Option<i32>,
    ) -> StopOutcome {
        let was_running = self.is_running();
        self.mark_stopped(exit_code);

        let crash = match exit_code {
            Some(code) if code != 0 && self.classified_epoch != Some(self.epoch) => {
                self.classified_epoch = Some(self.epoch);
                let log_excerpt = self.fetch_logs(backend).await;
                log::error!(
                    "Game crashed with exit code {} ({} log lines attached)",
                    code,
                    log_excerpt.len()
                );
                Some(CrashReport {
                    exit_code: code,
                    log_excerpt,
                })
            }
            Some(code) if code != 0 => {
                log::debug!("Crash for epoch {} already classified", self.epoch);
                None
            }
            _ => {
                if was_running {
                    log::info!("Game exited normally");
                }
                None
            }
        };

        StopOutcome {
            was_running,
            exit_code,
            crash,
        }
    }

    /// Fallback poll. Never classifies a crash.
    pub async fn poll(&mut self, backend: &dyn ExecutionBackend, grace: Duration) -> PollOutcome {
        let confirmation = match self.state {
            RunState::Running { confirmation } => confirmation,
            _ => return PollOutcome::Skipped,
        };

        // Процесс мог ещё не появиться после сигнала запуска
        if confirmation == Confirmation::Assumed
            && self.assumed_at.is_some_and(|at| at.elapsed() < grace)
        {
            return PollOutcome::Skipped;
        }

        match backend.is_process_running().await {
            Ok(true) => {
                if confirmation == Confirmation::Assumed {
                    log::debug!("Poll confirmed the game process");
                    self.state = RunState::Running {
                        confirmation: Confirmation::Confirmed,
                    };
                    self.assumed_at = None;
                }
                PollOutcome::StillRunning
            }
            Ok(false) => {
                log::info!("Poll: game process is gone");
                self.mark_stopped(None);
                PollOutcome::Stopped
            }
            Err(e) => {
                log::debug!("Process poll failed: {:#}", e);
                PollOutcome::Skipped
            }
        }
    }

    /// Ask the backend to stop. Running state changes only on the
    /// `stopped` event or the next poll.
    pub async fn request_stop(&self, backend: &dyn ExecutionBackend) -> Result<()> {
        log::info!("Requesting game stop");
        accepted(backend.stop_process().await, "stop_process")
    }

    fn mark_stopped(&mut self, exit_code: Option<i32>) {
        self.state = RunState::Stopped { exit_code };
        self.stop_confirmed_epoch = Some(self.epoch);
        self.assumed_at = None;
    }

    async fn fetch_logs(&self, backend: &dyn ExecutionBackend) -> Vec<String> {
        match backend.get_recent_logs(self.recent_log_lines).await {
            Ok(lines) => lines,
            Err(e) => {
                log::warn!("Failed to fetch recent logs: {:#}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use std::sync::atomic::Ordering;

    const GRACE: Duration = Duration::from_secs(3);

    #[tokio::test]
    async fn test_crash_classification() {
        let backend = MockBackend::new().with_logs(&["line 1", "line 2", "FATAL: out of memory"]);
        let mut supervisor = LaunchSupervisor::new(2);
        supervisor.begin_session();
        supervisor.on_started();

        let outcome = supervisor.on_stopped(&backend, Some(137)).await;
        assert!(outcome.was_running);
        let crash = outcome.crash.unwrap();
        assert_eq!(crash.exit_code, 137);
        assert_eq!(crash.log_excerpt, vec!["line 2", "FATAL: out of memory"]);

        // Duplicate stopped event: no second report
        let again = supervisor.on_stopped(&backend, Some(137)).await;
        assert!(!again.was_running);
        assert!(again.crash.is_none());
    }

    #[tokio::test]
    async fn test_normal_exit() {
        let backend = MockBackend::new().with_logs(&["bye"]);
        let mut supervisor = LaunchSupervisor::new(50);
        supervisor.begin_session();
        supervisor.on_started();

        assert!(supervisor.on_stopped(&backend, Some(0)).await.crash.is_none());
        assert_eq!(
            supervisor.state(),
            RunState::Stopped { exit_code: Some(0) }
        );

        supervisor.begin_session();
        supervisor.on_started();
        assert!(supervisor.on_stopped(&backend, None).await.crash.is_none());
    }

    #[tokio::test]
    async fn test_log_fetch_failure_still_classifies() {
        let backend = MockBackend::new();
        backend.fail_logs.store(true, Ordering::SeqCst);
        let mut supervisor = LaunchSupervisor::new(50);
        supervisor.begin_session();
        supervisor.assume_running();

        let crash = supervisor.on_stopped(&backend, Some(1)).await.crash.unwrap();
        assert!(crash.log_excerpt.is_empty());
    }

    #[test]
    fn test_assumed_never_downgrades_confirmed() {
        let mut supervisor = LaunchSupervisor::new(50);
        supervisor.begin_session();
        supervisor.on_started();

        assert!(!supervisor.assume_running());
        assert_eq!(
            supervisor.state(),
            RunState::Running {
                confirmation: Confirmation::Confirmed
            }
        );
    }

    #[tokio::test]
    async fn test_stale_launch_signal_after_stop() {
        let backend = MockBackend::new();
        let mut supervisor = LaunchSupervisor::new(50);
        supervisor.begin_session();
        supervisor.on_started();
        supervisor.on_stopped(&backend, Some(0)).await;

        assert!(!supervisor.assume_running());
        assert!(!supervisor.is_running());

        // Новая сессия снова принимает сигнал запуска
        supervisor.begin_session();
        assert!(supervisor.assume_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_grace_and_stop() {
        let backend = MockBackend::new();
        let mut supervisor = LaunchSupervisor::new(50);

        assert_eq!(supervisor.poll(&backend, GRACE).await, PollOutcome::Skipped);

        supervisor.begin_session();
        supervisor.assume_running();
        // Process not spawned yet, inside the grace window
        assert_eq!(supervisor.poll(&backend, GRACE).await, PollOutcome::Skipped);
        assert_eq!(backend.count_calls("is_process_running"), 0);

        tokio::time::advance(GRACE + Duration::from_millis(1)).await;
        backend.process_running.store(true, Ordering::SeqCst);
        assert_eq!(
            supervisor.poll(&backend, GRACE).await,
            PollOutcome::StillRunning
        );
        assert_eq!(
            supervisor.state(),
            RunState::Running {
                confirmation: Confirmation::Confirmed
            }
        );

        backend.process_running.store(false, Ordering::SeqCst);
        assert_eq!(supervisor.poll(&backend, GRACE).await, PollOutcome::Stopped);
        assert!(!supervisor.is_running());

        // Push after poll: same reset, no crash report without exit code
        let outcome = supervisor.on_stopped(&backend, None).await;
        assert!(!outcome.was_running);
        assert!(outcome.crash.is_none());
    }

    #[tokio::test]
    async fn test_poll_failure_ignored() {
        let backend = MockBackend::new();
        backend.fail_queries.store(true, Ordering::SeqCst);
        let mut supervisor = LaunchSupervisor::new(50);
        supervisor.begin_session();
        supervisor.on_started();

        assert_eq!(supervisor.poll(&backend, GRACE).await, PollOutcome::Skipped);
        assert!(supervisor.is_running());
    }

    #[tokio::test]
    async fn test_request_stop_keeps_running() {
        let backend = MockBackend::new();
        let mut supervisor = LaunchSupervisor::new(50);
        supervisor.begin_session();
        supervisor.on_started();

        supervisor.request_stop(&backend).await.unwrap();
        assert!(supervisor.is_running());
        assert_eq!(backend.count_calls("stop_process"), 1);
    }
}
