//! Notification events broadcast to live contexts.
//!
//! Events are triggers, never a source of truth: the receiving side refetches
//! the ledger instead of trusting the payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::TransitionOutcome;

pub const DOCUMENT_RECEIVED: &str = "document.received";
pub const DISPOSITION_CREATED: &str = "disposition.created";
pub const DISPOSITION_UPDATED: &str = "disposition.updated";
pub const DISPOSITION_COMPLETED: &str = "disposition.completed";
pub const PUSH_TEST: &str = "push.test";

/// Event types that change what an inbox shows.
pub const LEDGER_EVENTS: &[&str] = &[
    DOCUMENT_RECEIVED,
    DISPOSITION_CREATED,
    DISPOSITION_UPDATED,
    DISPOSITION_COMPLETED,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl NotificationEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn is_ledger_event(&self) -> bool {
        LEDGER_EVENTS.contains(&self.kind.as_str())
    }

    /// The event a backend emits after accepting a transition.
    pub fn from_outcome(outcome: &TransitionOutcome) -> Self {
        let hop = &outcome.hop;
        match &outcome.next {
            Some(next) => Self::new(
                DISPOSITION_CREATED,
                serde_json::json!({
                    "document_id": next.document_id,
                    "hop_id": next.id,
                    "target_role": next.target_role,
                    "previous_hop_id": hop.id,
                }),
            ),
            None => {
                let kind = if hop.status == crate::model::DispositionStatus::Completed {
                    DISPOSITION_COMPLETED
                } else {
                    DISPOSITION_UPDATED
                };
                Self::new(
                    kind,
                    serde_json::json!({
                        "document_id": hop.document_id,
                        "hop_id": hop.id,
                        "status": hop.status,
                    }),
                )
            }
        }
    }
}

/// Decoded push payload as delivered by the push service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl PushMessage {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let message: PushMessage = serde_json::from_slice(raw)?;
        if message.kind.trim().is_empty() {
            return Err(serde::de::Error::custom("empty event type"));
        }
        Ok(message)
    }

    /// Title shown in the platform notification.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Disposisi")
    }

    pub fn display_body(&self) -> String {
        match &self.body {
            Some(body) => body.clone(),
            None => format!("New activity: {}", self.kind),
        }
    }

    pub fn into_event(self) -> NotificationEvent {
        NotificationEvent {
            kind: self.kind,
            payload: self.payload,
        }
    }
}
