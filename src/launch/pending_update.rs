use crate::backend::{accepted, ExecutionBackend};
use crate::instances::Selection;
use hylaunch_core::{Branch, LauncherError, PendingUpdateRequest, Result};
use serde::{Deserialize, Serialize};

/// User answer to a pending "latest" update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingUpdateChoice {
    /// Copy user data from the old version into the new one, then play
    ConfirmWithCopy,
    ConfirmWithoutCopy,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Suspend(PendingUpdateRequest),
}

/// Holds back "play latest" while the update would overwrite older user data
#[derive(Debug, Default)]
pub struct PendingUpdateGate {
    pending: Option<PendingUpdateRequest>,
}

impl PendingUpdateGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&PendingUpdateRequest> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Decide whether `selection` may start. Fails open when the backend cannot answer.
    pub async fn check(
        &mut self,
        backend: &dyn ExecutionBackend,
        selection: Selection,
    ) -> GateDecision {
        if let Some(request) = &self.pending {
            return GateDecision::Suspend(request.clone());
        }
        if !selection.is_latest() {
            return GateDecision::Proceed;
        }

        match backend.get_pending_update_info(selection.branch).await {
            Ok(Some(info)) if info.has_old_user_data && info.new_version > info.old_version => {
                log::info!(
                    "Update of {} latest {} -> {} needs confirmation",
                    selection.branch,
                    info.old_version,
                    info.new_version
                );
                let request = PendingUpdateRequest::from(info);
                self.pending = Some(request.clone());
                GateDecision::Suspend(request)
            }
            Ok(_) => GateDecision::Proceed,
            Err(e) => {
                log::warn!("Pending update check failed, continuing: {:#}", e);
                GateDecision::Proceed
            }
        }
    }

    /// Resolve the pending request. Returns the request when the launch should go on,
    /// `None` when the user cancelled.
    pub async fn resolve(
        &mut self,
        backend: &dyn ExecutionBackend,
        choice: PendingUpdateChoice,
    ) -> Result<Option<PendingUpdateRequest>> {
        let request = self.pending.take().ok_or(LauncherError::NoPendingUpdate)?;

        match choice {
            PendingUpdateChoice::Cancel => {
                log::info!("Pending update for {} cancelled", request.branch);
                Ok(None)
            }
            PendingUpdateChoice::ConfirmWithoutCopy => Ok(Some(request)),
            PendingUpdateChoice::ConfirmWithCopy => {
                let copied = accepted(
                    backend
                        .copy_user_data(request.branch, request.old_version, request.new_version)
                        .await,
                    "copy_user_data",
                );
                match copied {
                    Ok(()) => log::info!(
                        "User data copied {} -> {}",
                        request.old_version,
                        request.new_version
                    ),
                    Err(e) => log::warn!("Failed to copy user data, launching anyway: {}", e),
                }
                Ok(Some(request))
            }
        }
    }

    /// Drop a request that no longer matches the selection
    pub fn discard_unless(&mut self, branch: Branch, latest: bool) -> bool {
        let stale = self
            .pending
            .as_ref()
            .is_some_and(|p| !latest || p.branch != branch);
        if stale {
            log::debug!("Discarding pending update request after selection change");
            self.pending = None;
        }
        stale
    }
}
