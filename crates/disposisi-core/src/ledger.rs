//! Authoritative disposition state machine.
//!
//! [`LedgerBackend`] is the seam the client layer talks to; the HTTP client in
//! `disposisi-sync` implements it against the portal backend, and
//! [`MemoryLedger`] implements the same rules in-process.
//!
//! Transitions are conditional updates keyed on (document, hop, expected
//! status). Checks run in a fixed order and nothing is written until all of
//! them pass:
//!
//! 1. document and hop exist (`NotFound`)
//! 2. the principal's role is the hop's target role (`Forbidden`)
//! 3. the expected status matches (`Conflict`), except for a repeated `read`
//! 4. the action is legal for the hop and the chain (`InvalidTransition`)

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::chain::RoleChain;
use crate::error::PortalError;
use crate::model::{
    Disposition, DispositionStatus, Document, DocumentId, HopId, NewDocument, Principal, Role,
    TransitionAction, TransitionOutcome, TransitionRequest,
};

#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Non-terminal hops addressed to `role`, oldest first.
    async fn inbox(&self, role: Role) -> Result<Vec<Disposition>, PortalError>;

    /// Full routing chain of a document, in order.
    async fn history(&self, document: DocumentId) -> Result<Vec<Disposition>, PortalError>;

    async fn transition(
        &self,
        principal: &Principal,
        document: DocumentId,
        request: &TransitionRequest,
    ) -> Result<TransitionOutcome, PortalError>;
}

struct DocumentRecord {
    document: Document,
    hops: Vec<Disposition>,
}

#[derive(Default)]
struct LedgerState {
    next_document: u64,
    next_hop: u64,
    documents: BTreeMap<DocumentId, DocumentRecord>,
}

/// In-process ledger enforcing the routing rules.
pub struct MemoryLedger {
    chain: RoleChain,
    state: Mutex<LedgerState>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(RoleChain::standard())
    }
}

impl MemoryLedger {
    pub fn new(chain: RoleChain) -> Self {
        Self {
            chain,
            state: Mutex::new(LedgerState {
                next_document: 1,
                next_hop: 1,
                documents: BTreeMap::new(),
            }),
        }
    }

    pub fn chain(&self) -> &RoleChain {
        &self.chain
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // A panic mid-transition cannot leave partial writes: all mutation
        // happens after validation, so the state is usable after poisoning.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a letter and open its first hop for the chain's entry role.
    pub fn intake(&self, new: NewDocument) -> Result<(Document, Disposition), PortalError> {
        let entry = self.chain.entry().ok_or_else(|| {
            PortalError::InvalidTransition("routing chain has no entry role".into())
        })?;

        let mut state = self.lock();
        let document_id = DocumentId(state.next_document);
        state.next_document += 1;
        let hop_id = HopId(state.next_hop);
        state.next_hop += 1;

        let hop = Disposition {
            id: hop_id,
            document_id,
            from_role: None,
            target_role: entry,
            instruction: String::new(),
            note: None,
            deadline: None,
            status: DispositionStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        };
        let document = Document {
            id: document_id,
            origin: new.origin,
            reference_number: new.reference_number,
            subject: new.subject,
            received_on: new.received_on,
            attachment: new.attachment,
            status: DispositionStatus::Pending,
        };

        info!(
            document = %document_id,
            reference = %document.reference_number,
            role = %entry,
            "document received"
        );
        state.documents.insert(
            document_id,
            DocumentRecord {
                document: document.clone(),
                hops: vec![hop.clone()],
            },
        );
        Ok((document, hop))
    }

    pub fn document(&self, id: DocumentId) -> Result<Document, PortalError> {
        let state = self.lock();
        state
            .documents
            .get(&id)
            .map(|r| r.document.clone())
            .ok_or_else(|| PortalError::NotFound(format!("document {id}")))
    }

    pub fn history_of(&self, id: DocumentId) -> Result<Vec<Disposition>, PortalError> {
        let state = self.lock();
        state
            .documents
            .get(&id)
            .map(|r| r.hops.clone())
            .ok_or_else(|| PortalError::NotFound(format!("document {id}")))
    }

    /// The single non-terminal hop of a document, if routing is still open.
    pub fn active_hop(&self, id: DocumentId) -> Result<Option<Disposition>, PortalError> {
        Ok(self.history_of(id)?.into_iter().find(Disposition::is_active))
    }

    pub fn inbox_for(&self, role: Role) -> Vec<Disposition> {
        let state = self.lock();
        let mut hops: Vec<Disposition> = state
            .documents
            .values()
            .flat_map(|r| r.hops.iter())
            .filter(|h| h.target_role == role && h.is_active())
            .cloned()
            .collect();
        hops.sort_by_key(|h| (h.created_at, h.id));
        hops
    }

    /// Apply a conditional transition.
    pub fn apply(
        &self,
        principal: &Principal,
        document: DocumentId,
        request: &TransitionRequest,
    ) -> Result<TransitionOutcome, PortalError> {
        let mut state = self.lock();
        let next_hop = HopId(state.next_hop);

        let record = state
            .documents
            .get_mut(&document)
            .ok_or_else(|| PortalError::NotFound(format!("document {document}")))?;
        let idx = record
            .hops
            .iter()
            .position(|h| h.id == request.hop_id)
            .ok_or_else(|| {
                PortalError::NotFound(format!("hop {} on document {document}", request.hop_id))
            })?;
        let current = &record.hops[idx];

        if principal.role != current.target_role {
            return Err(PortalError::Forbidden(format!(
                "{} cannot act on a hop addressed to {}",
                principal.role, current.target_role
            )));
        }

        if request.action == TransitionAction::Read
            && matches!(
                current.status,
                DispositionStatus::Read | DispositionStatus::InProgress
            )
        {
            debug!(hop = %current.id, "hop already acknowledged");
            return Ok(TransitionOutcome {
                hop: current.clone(),
                next: None,
            });
        }

        if current.status != request.expected_status {
            return Err(PortalError::Conflict {
                hop: current.id,
                expected: request.expected_status,
                actual: Some(current.status),
            });
        }

        let step = self.validate(current, request)?;
        let now = Utc::now();

        let next = match step {
            Step::Status(status) => {
                let hop = &mut record.hops[idx];
                hop.status = status;
                if status.is_terminal() {
                    hop.completed_at = Some(now);
                }
                if let Some(note) = &request.note {
                    hop.note = Some(note.clone());
                }
                None
            }
            Step::Forward { to, instruction } => {
                let hop = &mut record.hops[idx];
                hop.status = DispositionStatus::Forwarded;
                hop.completed_at = Some(now);
                let from = hop.target_role;
                let successor = Disposition {
                    id: next_hop,
                    document_id: document,
                    from_role: Some(from),
                    target_role: to,
                    instruction,
                    note: request.note.clone(),
                    deadline: request.deadline,
                    status: DispositionStatus::Pending,
                    created_at: now,
                    completed_at: None,
                };
                record.hops.push(successor.clone());
                Some(successor)
            }
        };

        let hop = record.hops[idx].clone();
        record.document.status = record
            .hops
            .last()
            .map(|h| h.status)
            .unwrap_or(DispositionStatus::Pending);
        if next.is_some() {
            state.next_hop += 1;
        }

        info!(
            document = %document,
            hop = %hop.id,
            action = %request.action,
            status = %hop.status,
            next_role = next.as_ref().map(|n| n.target_role.as_str()),
            "disposition transitioned"
        );
        Ok(TransitionOutcome { hop, next })
    }

    fn validate(&self, hop: &Disposition, request: &TransitionRequest) -> Result<Step, PortalError> {
        if hop.status.is_terminal() {
            return Err(PortalError::InvalidTransition(format!(
                "hop {} is already {}",
                hop.id, hop.status
            )));
        }

        match request.action {
            TransitionAction::Read => Ok(Step::Status(DispositionStatus::Read)),
            TransitionAction::Start => {
                if hop.status != DispositionStatus::Read {
                    return Err(PortalError::InvalidTransition(format!(
                        "hop {} must be read before work starts",
                        hop.id
                    )));
                }
                Ok(Step::Status(DispositionStatus::InProgress))
            }
            TransitionAction::Forward => {
                let to = request.target_role.ok_or_else(|| {
                    PortalError::InvalidTransition("forward requires a target role".into())
                })?;
                let instruction = request
                    .instruction
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default();
                if instruction.is_empty() {
                    return Err(PortalError::InvalidTransition(
                        "forward requires an instruction".into(),
                    ));
                }
                if !self.chain.has_successor(hop.target_role) {
                    return Err(PortalError::InvalidTransition(format!(
                        "{} has no successor in the routing chain",
                        hop.target_role
                    )));
                }
                if !self.chain.can_forward(hop.target_role, to) {
                    return Err(PortalError::InvalidTransition(format!(
                        "{} cannot forward to {to}",
                        hop.target_role
                    )));
                }
                Ok(Step::Forward {
                    to,
                    instruction: instruction.to_string(),
                })
            }
            TransitionAction::Complete => {
                if !self.chain.is_terminal_acceptor(hop.target_role) {
                    return Err(PortalError::InvalidTransition(format!(
                        "{} may not complete a disposition",
                        hop.target_role
                    )));
                }
                Ok(Step::Status(DispositionStatus::Completed))
            }
        }
    }
}

enum Step {
    Status(DispositionStatus),
    Forward { to: Role, instruction: String },
}

#[async_trait]
impl LedgerBackend for MemoryLedger {
    async fn inbox(&self, role: Role) -> Result<Vec<Disposition>, PortalError> {
        Ok(self.inbox_for(role))
    }

    async fn history(&self, document: DocumentId) -> Result<Vec<Disposition>, PortalError> {
        self.history_of(document)
    }

    async fn transition(
        &self,
        principal: &Principal,
        document: DocumentId,
        request: &TransitionRequest,
    ) -> Result<TransitionOutcome, PortalError> {
        self.apply(principal, document, request)
    }
}
