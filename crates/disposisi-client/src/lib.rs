//! Client-side plumbing for the disposition portal.
//!
//! Push subscription lifecycle, the notification receiver that fans push
//! payloads out to live contexts, the debounced auto-reload coordinator, and
//! the desk a principal works documents from.

pub mod desk;
pub mod hub;
pub mod receiver;
pub mod reload;
pub mod state;
pub mod subscription;

pub use desk::{Desk, DeskItem};
pub use hub::EventHub;
pub use receiver::{
    FocusFlag, FocusProbe, Notice, NotificationReceiver, NotificationSink, ReceiverHandle,
    ReceiverStats,
};
pub use reload::{AutoReloadCoordinator, EventFilter, ReloadOptions, ReloadStats};
pub use state::{ClientState, FileStateStore, MemoryStateStore, StateStore};
pub use subscription::{InitOutcome, SubscriptionManager, SubscriptionStatus};
