//! Core types for document disposition routing: the role chain, the ledger state machine,
//! role-based view resolution, notification events, and push subscription seams.

pub mod chain;
pub mod error;
pub mod event;
pub mod ledger;
pub mod model;
pub mod push;
pub mod router;

pub use chain::RoleChain;
pub use error::PortalError;
pub use event::{NotificationEvent, PushMessage};
pub use ledger::{LedgerBackend, MemoryLedger};
pub use model::{
    Disposition, DispositionStatus, Document, DocumentId, HopId, NewDocument, Principal, Role,
    TransitionAction, TransitionOutcome, TransitionRequest,
};
pub use push::{
    DeliveryReport, PermissionState, PushPlatform, PushRegistry, PushSubscription, ServerKey,
    SubscriptionKeys,
};
pub use router::{RoleRouter, RouteDecision, ViewKind};
