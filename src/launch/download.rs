//! Download / install / launch progress state machine
//!
//! Driven only by backend `progress-update` events and by local commands.
//! At most one session is active at a time.

use crate::instances::Selection;
use hylaunch_core::{DownloadProgressEvent, LauncherError, ProgressState, Result, SessionKind};
use serde::{Deserialize, Serialize};

/// Coarse phase shown in the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadBucket {
    #[default]
    Idle,
    Downloading,
    Extracting,
    Launching,
    Running,
}

/// Last reported progress. Last write wins per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressFields {
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub message_key: Option<String>,
    pub message_args: Vec<String>,
}

impl ProgressFields {
    fn update(&mut self, event: &DownloadProgressEvent) {
        self.progress = event.progress.clamp(0.0, 100.0);
        self.downloaded_bytes = event.downloaded_bytes;
        self.total_bytes = event.total_bytes;
        self.message_key = event.message_key.clone();
        self.message_args = event.args.clone();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The session currently owned by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSession {
    pub kind: SessionKind,
    pub selection: Selection,
}

/// What a progress event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Late or unknown event, nothing changed
    Ignored,
    Updated,
    /// `complete` at 100%. `finished` is set when the session ends here (download-only).
    Installed { selection: Selection, finished: bool },
    /// Backend is spawning the game. Running is assumed until confirmed.
    LaunchAssumed { selection: Selection },
    /// Backend cancelled the session
    Cancelled { session: ActiveSession },
}

#[derive(Debug, Default)]
pub struct DownloadController {
    bucket: DownloadBucket,
    fields: ProgressFields,
    session: Option<ActiveSession>,
}

impl DownloadController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(&self) -> DownloadBucket {
        self.bucket
    }

    pub fn fields(&self) -> &ProgressFields {
        &self.fields
    }

    pub fn session(&self) -> Option<ActiveSession> {
        self.session
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Open a session. Fails if one is already active.
    pub fn begin(&mut self, kind: SessionKind, selection: Selection) -> Result<()> {
        if let Some(active) = self.session {
            log::warn!(
                "Rejecting {} for {}: {} for {} is still active",
                kind.as_str(),
                selection,
                active.kind.as_str(),
                active.selection
            );
            return Err(LauncherError::DownloadInProgress);
        }

        self.session = Some(ActiveSession { kind, selection });
        self.bucket = match kind {
            SessionKind::LaunchOnly => DownloadBucket::Launching,
            _ => DownloadBucket::Downloading,
        };
        log::info!("Session started: {} for {}", kind.as_str(), selection);
        Ok(())
    }

    /// Events without an active session (the tail after a local cancel,
    /// its `cancelled` echo included) are ignored.
    pub fn apply(&mut self, event: &DownloadProgressEvent) -> Transition {
        let Some(session) = self.session else {
            log::debug!("Ignoring {:?} progress event: no active session", event.state);
            return Transition::Ignored;
        };

        match event.state {
            ProgressState::Download | ProgressState::Update => {
                self.fields.update(event);
                self.bucket = DownloadBucket::Downloading;
                Transition::Updated
            }
            ProgressState::Install => {
                self.fields.update(event);
                self.bucket = DownloadBucket::Extracting;
                Transition::Updated
            }
            ProgressState::Complete => {
                self.fields.update(event);
                if event.progress < 100.0 {
                    return Transition::Updated;
                }

                let finished = !session.kind.launches();
                if finished {
                    log::info!("Download-only session finished for {}", session.selection);
                    self.session = None;
                    self.bucket = DownloadBucket::Idle;
                } else {
                    self.bucket = DownloadBucket::Launching;
                }
                Transition::Installed {
                    selection: session.selection,
                    finished,
                }
            }
            ProgressState::Launch | ProgressState::Launching => {
                log::info!("Launching {}", session.selection);
                self.session = None;
                self.bucket = DownloadBucket::Running;
                self.fields.reset();
                Transition::LaunchAssumed {
                    selection: session.selection,
                }
            }
            ProgressState::Cancelled => {
                log::info!("Backend cancelled session for {}", session.selection);
                self.session = None;
                self.bucket = DownloadBucket::Idle;
                self.fields.reset();
                Transition::Cancelled { session }
            }
            ProgressState::Unknown => {
                log::debug!("Ignoring progress event with unknown state");
                Transition::Ignored
            }
        }
    }

    /// Local cancel: idle right away
    pub fn cancel(&mut self) -> Option<ActiveSession> {
        let session = self.session.take();
        self.bucket = DownloadBucket::Idle;
        self.fields.reset();
        session
    }

    /// Backend failed the session. Progress values stay for the error screen.
    pub fn fail(&mut self) -> Option<ActiveSession> {
        let session = self.session.take();
        if self.bucket != DownloadBucket::Running {
            self.bucket = DownloadBucket::Idle;
        }
        session
    }

    /// `game-state started` without a launch progress event closes the session too
    pub fn on_game_started(&mut self) -> Option<ActiveSession> {
        let session = self.session.filter(|s| s.kind.launches());
        if session.is_some() {
            self.session = None;
            self.fields.reset();
        }
        if !self.is_active() {
            self.bucket = DownloadBucket::Running;
        }
        session
    }

    /// Game stopped. An unrelated download-only session keeps going.
    pub fn reset_after_stop(&mut self) {
        if self.is_active() {
            return;
        }
        self.bucket = DownloadBucket::Idle;
        self.fields.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hylaunch_core::Branch;

    fn selection() -> Selection {
        Selection {
            branch: Branch::Release,
            version: 4,
        }
    }

    fn event(state: ProgressState, progress: f64) -> DownloadProgressEvent {
        DownloadProgressEvent::new(state, progress)
    }

    #[test]
    fn test_full_download_and_launch() {
        let mut controller = DownloadController::new();
        controller
            .begin(SessionKind::DownloadAndLaunch, selection())
            .unwrap();

        assert_eq!(
            controller.apply(&event(ProgressState::Download, 40.0).with_bytes(400, 1000)),
            Transition::Updated
        );
        assert_eq!(controller.bucket(), DownloadBucket::Downloading);
        assert_eq!(controller.fields().downloaded_bytes, 400);

        controller.apply(&event(ProgressState::Install, 70.0));
        assert_eq!(controller.bucket(), DownloadBucket::Extracting);

        // complete < 100 only updates numbers
        assert_eq!(
            controller.apply(&event(ProgressState::Complete, 99.0)),
            Transition::Updated
        );
        assert_eq!(controller.bucket(), DownloadBucket::Extracting);

        assert_eq!(
            controller.apply(&event(ProgressState::Complete, 100.0)),
            Transition::Installed {
                selection: selection(),
                finished: false
            }
        );
        assert_eq!(controller.bucket(), DownloadBucket::Launching);
        assert!(controller.is_active());

        assert_eq!(
            controller.apply(&event(ProgressState::Launching, 100.0)),
            Transition::LaunchAssumed {
                selection: selection()
            }
        );
        assert_eq!(controller.bucket(), DownloadBucket::Running);
        assert_eq!(controller.fields().progress, 0.0);
        assert!(!controller.is_active());
    }

    #[test]
    fn test_download_only_finishes_on_complete() {
        let mut controller = DownloadController::new();
        controller
            .begin(SessionKind::DownloadOnly, selection())
            .unwrap();

        assert_eq!(
            controller.apply(&event(ProgressState::Complete, 100.0)),
            Transition::Installed {
                selection: selection(),
                finished: true
            }
        );
        assert!(!controller.is_active());
        assert_eq!(controller.bucket(), DownloadBucket::Idle);
    }

    #[test]
    fn test_second_session_rejected() {
        let mut controller = DownloadController::new();
        controller
            .begin(SessionKind::DownloadAndLaunch, selection())
            .unwrap();
        assert!(matches!(
            controller.begin(SessionKind::DownloadOnly, selection()),
            Err(LauncherError::DownloadInProgress)
        ));
    }

    #[test]
    fn test_cancel_then_late_events() {
        let mut controller = DownloadController::new();
        controller
            .begin(SessionKind::DownloadAndLaunch, selection())
            .unwrap();
        controller.apply(&event(ProgressState::Download, 55.0));

        assert!(controller.cancel().is_some());
        assert_eq!(controller.bucket(), DownloadBucket::Idle);
        assert_eq!(controller.fields().progress, 0.0);

        // Хвост событий после отмены
        assert_eq!(
            controller.apply(&event(ProgressState::Download, 60.0)),
            Transition::Ignored
        );
        assert_eq!(
            controller.apply(&event(ProgressState::Cancelled, 0.0)),
            Transition::Ignored
        );
        assert_eq!(controller.fields().progress, 0.0);
    }

    #[test]
    fn test_next_session_can_be_cancelled_by_backend() {
        let mut controller = DownloadController::new();
        controller
            .begin(SessionKind::DownloadAndLaunch, selection())
            .unwrap();
        controller.cancel();

        // Эхо отмены потерялось, бэкенд отменяет уже новую сессию
        controller
            .begin(SessionKind::DownloadOnly, selection())
            .unwrap();
        assert_eq!(
            controller.apply(&event(ProgressState::Cancelled, 0.0)),
            Transition::Cancelled {
                session: ActiveSession {
                    kind: SessionKind::DownloadOnly,
                    selection: selection(),
                }
            }
        );
        assert!(!controller.is_active());
        assert_eq!(controller.bucket(), DownloadBucket::Idle);
    }

    #[test]
    fn test_backend_cancel_echo() {
        let mut controller = DownloadController::new();
        controller
            .begin(SessionKind::DownloadAndLaunch, selection())
            .unwrap();

        assert_eq!(
            controller.apply(&event(ProgressState::Cancelled, 0.0)),
            Transition::Cancelled {
                session: ActiveSession {
                    kind: SessionKind::DownloadAndLaunch,
                    selection: selection(),
                }
            }
        );
        assert!(!controller.is_active());
    }

    #[test]
    fn test_fail_keeps_progress() {
        let mut controller = DownloadController::new();
        controller
            .begin(SessionKind::DownloadAndLaunch, selection())
            .unwrap();
        controller.apply(&event(ProgressState::Download, 30.0));

        assert!(controller.fail().is_some());
        assert_eq!(controller.bucket(), DownloadBucket::Idle);
        assert_eq!(controller.fields().progress, 30.0);
    }

    #[test]
    fn test_stop_keeps_download_only_session() {
        let mut controller = DownloadController::new();
        controller
            .begin(SessionKind::DownloadOnly, selection())
            .unwrap();
        controller.apply(&event(ProgressState::Download, 10.0));

        assert!(controller.on_game_started().is_none());
        controller.reset_after_stop();
        assert!(controller.is_active());
        assert_eq!(controller.fields().progress, 10.0);
    }
}
