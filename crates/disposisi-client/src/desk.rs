//! A principal's working view of the ledger.
//!
//! The desk pre-checks actions against the role router so the UI never offers
//! something the ledger would reject, but the ledger remains the authority.

use std::sync::Arc;

use disposisi_core::{
    Disposition, DispositionStatus, DocumentId, HopId, LedgerBackend, PortalError, Principal,
    RoleRouter, RouteDecision, TransitionAction, TransitionOutcome, TransitionRequest, ViewKind,
};
use tracing::{debug, info, warn};

use crate::state::StateStore;

/// One inbox entry with the actions available on it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeskItem {
    pub hop: Disposition,
    pub decision: RouteDecision,
}

pub struct Desk {
    ledger: Arc<dyn LedgerBackend>,
    router: RoleRouter,
    principal: Principal,
    store: Arc<dyn StateStore>,
}

impl Desk {
    pub fn new(
        ledger: Arc<dyn LedgerBackend>,
        router: RoleRouter,
        principal: Principal,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            ledger,
            router,
            principal,
            store,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn view(&self) -> Result<ViewKind, PortalError> {
        self.router.view_for(self.principal.role)
    }

    pub async fn inbox(&self) -> Result<Vec<DeskItem>, PortalError> {
        // Unmapped roles get nothing, not a fallback view.
        self.view()?;
        let hops = self.ledger.inbox(self.principal.role).await?;
        hops.into_iter()
            .map(|hop| {
                let decision = self.router.resolve(self.principal.role, &hop)?;
                Ok(DeskItem { hop, decision })
            })
            .collect()
    }

    pub async fn history(&self, document: DocumentId) -> Result<Vec<Disposition>, PortalError> {
        self.ledger.history(document).await
    }

    /// Mark a hop read on first open. Returns `false` when no call was made:
    /// this client had already acknowledged it, or the hop is already past
    /// `pending` (read elsewhere).
    pub async fn acknowledge(&self, hop: &Disposition) -> Result<bool, PortalError> {
        let mut state = self.store.load()?;
        if state.is_acked(hop.document_id, hop.id) {
            debug!(document = %hop.document_id, hop = %hop.id, "hop already acknowledged");
            return Ok(false);
        }
        if is_acknowledged(hop.status) {
            if self.router.resolve(self.principal.role, hop)?.read_only {
                return Err(not_addressed(hop, &self.principal));
            }
            debug!(
                document = %hop.document_id,
                hop = %hop.id,
                status = %hop.status,
                "hop read elsewhere"
            );
            state.mark_acked(hop.document_id, hop.id);
            self.store.save(&state)?;
            return Ok(false);
        }
        self.act(hop, TransitionRequest::read(hop)).await?;
        Ok(true)
    }

    /// Submit a transition for `hop`.
    ///
    /// Conflicts coming back without the current status are completed from
    /// the document history so callers can refresh and decide.
    pub async fn act(
        &self,
        hop: &Disposition,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, PortalError> {
        if request.hop_id != hop.id {
            return Err(PortalError::InvalidTransition(format!(
                "request targets hop {} but hop {} was checked",
                request.hop_id, hop.id
            )));
        }
        let decision = self.router.resolve(self.principal.role, hop)?;
        if decision.read_only {
            return Err(not_addressed(hop, &self.principal));
        }
        // A repeat read is a no-op in the ledger, so it skips the status gate.
        let repeat_read =
            request.action == TransitionAction::Read && is_acknowledged(hop.status);
        if !repeat_read && !decision.permits(request.action) {
            return Err(PortalError::InvalidTransition(format!(
                "{} is not available on hop {} ({})",
                request.action, hop.id, hop.status
            )));
        }
        if let Some(target) = request.target_role
            && !decision.forward_targets.contains(&target)
        {
            return Err(PortalError::InvalidTransition(format!(
                "{target} is not a forward target for {}",
                self.principal.role
            )));
        }

        let document = hop.document_id;
        let outcome = match self
            .ledger
            .transition(&self.principal, document, &request)
            .await
        {
            Ok(outcome) => outcome,
            Err(PortalError::Conflict {
                hop: conflicted,
                expected,
                actual: None,
            }) => {
                let actual = self.current_status(document, conflicted).await;
                return Err(PortalError::Conflict {
                    hop: conflicted,
                    expected,
                    actual,
                });
            }
            Err(e) => return Err(e),
        };

        info!(
            document = %document,
            hop = %outcome.hop.id,
            action = %request.action,
            status = %outcome.hop.status,
            "transition accepted"
        );
        if request.action == TransitionAction::Read {
            let mut state = self.store.load()?;
            state.mark_acked(document, outcome.hop.id);
            self.store.save(&state)?;
        }
        Ok(outcome)
    }

    async fn current_status(
        &self,
        document: DocumentId,
        hop: HopId,
    ) -> Option<DispositionStatus> {
        match self.ledger.history(document).await {
            Ok(hops) => hops.into_iter().find(|h| h.id == hop).map(|h| h.status),
            Err(e) => {
                warn!(document = %document, error = %e, "refetch after conflict failed");
                None
            }
        }
    }
}

fn is_acknowledged(status: DispositionStatus) -> bool {
    matches!(
        status,
        DispositionStatus::Read | DispositionStatus::InProgress
    )
}

fn not_addressed(hop: &Disposition, principal: &Principal) -> PortalError {
    PortalError::Forbidden(format!(
        "hop {} is not addressed to {}",
        hop.id, principal.role
    ))
}
