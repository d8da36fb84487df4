//! Client-side persisted state.
//!
//! Nothing here is authoritative. The acknowledged-hop map only suppresses
//! duplicate `read` calls; the ledger still decides.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use disposisi_core::{DocumentId, HopId, PortalError, PushSubscription};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default)]
    pub subscription: Option<PushSubscription>,
    #[serde(default)]
    pub subscription_valid: bool,
    #[serde(default)]
    pub needs_resubscribe: bool,
    /// document → last hop this client acknowledged.
    #[serde(default)]
    pub last_acked: BTreeMap<DocumentId, HopId>,
}

impl ClientState {
    pub fn live_subscription(&self) -> Option<&PushSubscription> {
        self.subscription
            .as_ref()
            .filter(|_| self.subscription_valid)
    }

    pub fn is_acked(&self, document: DocumentId, hop: HopId) -> bool {
        self.last_acked.get(&document) == Some(&hop)
    }

    pub fn mark_acked(&mut self, document: DocumentId, hop: HopId) {
        self.last_acked.insert(document, hop);
    }

    /// Mark the stored endpoint dead. The record is dropped so nothing is sent to it again.
    pub fn invalidate_subscription(&mut self) {
        self.subscription = None;
        self.subscription_valid = false;
        self.needs_resubscribe = true;
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<ClientState, PortalError>;
    fn save(&self, state: &ClientState) -> Result<(), PortalError>;
}

/// JSON file, replaced atomically on save.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<ClientState, PortalError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no client state yet");
                return Ok(ClientState::default());
            }
            Err(e) => return Err(PortalError::State(e.to_string())),
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding unreadable client state");
                Ok(ClientState::default())
            }
        }
    }

    fn save(&self, state: &ClientState) -> Result<(), PortalError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| PortalError::State(e.to_string()))?;

        let json =
            serde_json::to_vec_pretty(state).map_err(|e| PortalError::State(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| PortalError::State(e.to_string()))?;
        tmp.write_all(&json)
            .map_err(|e| PortalError::State(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| PortalError::State(e.to_string()))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<ClientState>,
}

impl MemoryStateStore {
    pub fn new(state: ClientState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> ClientState {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<ClientState, PortalError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &ClientState) -> Result<(), PortalError> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        Ok(())
    }
}
