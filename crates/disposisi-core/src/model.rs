//! Document and disposition types shared between the ledger and its clients.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HopId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for HopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Organizational role carried in the session's role claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    DepartmentHead,
    Secretary,
    DivisionHead,
    Staff,
    /// Intake and registry clerk. Not part of the routing chain.
    Operator,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::DepartmentHead,
        Role::Secretary,
        Role::DivisionHead,
        Role::Staff,
        Role::Operator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DepartmentHead => "department_head",
            Self::Secretary => "secretary",
            Self::DivisionHead => "division_head",
            Self::Staff => "staff",
            Self::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| format!("unknown role {s:?}"))
    }
}

/// Status of a single hop.
///
/// `Forwarded` and `Completed` are terminal for the hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionStatus {
    Pending,
    Read,
    InProgress,
    Forwarded,
    Completed,
}

impl DispositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Read => "read",
            Self::InProgress => "in_progress",
            Self::Forwarded => "forwarded",
            Self::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Forwarded | Self::Completed)
    }
}

impl fmt::Display for DispositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incoming official letter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub origin: String,
    pub reference_number: String,
    pub subject: String,
    pub received_on: NaiveDate,
    pub attachment: Option<String>,
    /// Status of the active hop, or of the last hop once routing has ended.
    pub status: DispositionStatus,
}

/// Intake input for a new letter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub origin: String,
    pub reference_number: String,
    pub subject: String,
    pub received_on: NaiveDate,
    #[serde(default)]
    pub attachment: Option<String>,
}

/// One hop of routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disposition {
    pub id: HopId,
    pub document_id: DocumentId,
    /// `None` for the hop created at intake.
    pub from_role: Option<Role>,
    pub target_role: Role,
    pub instruction: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    pub status: DispositionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Disposition {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Authenticated caller, injected by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Read,
    Start,
    Forward,
    Complete,
}

impl TransitionAction {
    pub const ALL: [TransitionAction; 4] = [
        TransitionAction::Read,
        TransitionAction::Start,
        TransitionAction::Forward,
        TransitionAction::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Start => "start",
            Self::Forward => "forward",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /disposition/{document_id}/transition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub action: TransitionAction,
    pub hop_id: HopId,
    pub expected_status: DispositionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
}

impl TransitionRequest {
    fn bare(action: TransitionAction, hop: &Disposition) -> Self {
        Self {
            action,
            hop_id: hop.id,
            expected_status: hop.status,
            target_role: None,
            instruction: None,
            note: None,
            deadline: None,
        }
    }

    /// Acknowledge receipt, expecting the hop's currently known status.
    pub fn read(hop: &Disposition) -> Self {
        Self::bare(TransitionAction::Read, hop)
    }

    pub fn start(hop: &Disposition) -> Self {
        Self::bare(TransitionAction::Start, hop)
    }

    pub fn forward(hop: &Disposition, target_role: Role, instruction: impl Into<String>) -> Self {
        Self {
            target_role: Some(target_role),
            instruction: Some(instruction.into()),
            ..Self::bare(TransitionAction::Forward, hop)
        }
    }

    pub fn complete(hop: &Disposition) -> Self {
        Self::bare(TransitionAction::Complete, hop)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_deadline(mut self, deadline: NaiveDate) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Override the expected status, e.g. to replay a request built from stale data.
    pub fn expecting(mut self, status: DispositionStatus) -> Self {
        self.expected_status = status;
        self
    }
}

/// Result of an accepted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    /// The hop that was transitioned, in its new state.
    pub hop: Disposition,
    /// The successor hop created by a forward.
    #[serde(default)]
    pub next: Option<Disposition>,
}
