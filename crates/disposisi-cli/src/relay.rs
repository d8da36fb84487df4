//! Push platform for a terminal.
//!
//! A terminal has no push service of its own. A relay process owns the push
//! endpoint and pipes decrypted payloads to `disposisi watch` as JSON lines.
//! This module keeps the relay-side record: whether the user allowed
//! notifications and which endpoint is currently subscribed.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use disposisi_core::{
    PermissionState, PortalError, PushPlatform, PushSubscription, ServerKey, SubscriptionKeys,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub endpoint: Option<String>,
    pub p256dh: String,
    pub auth: String,
    /// Grant permission without asking.
    pub assume_yes: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RelayRecord {
    #[serde(default)]
    permission: Option<PermissionState>,
    #[serde(default)]
    subscription: Option<PushSubscription>,
}

pub struct RelayPlatform {
    config: RelayConfig,
    path: PathBuf,
    record: Mutex<RelayRecord>,
}

impl RelayPlatform {
    pub fn open(config: RelayConfig, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let record = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RelayRecord::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            config,
            path,
            record: Mutex::new(record),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RelayRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self, record: &RelayRecord) -> Result<(), PortalError> {
        write_record(&self.path, record).map_err(|e| PortalError::State(e.to_string()))
    }

    fn update(&self, f: impl FnOnce(&mut RelayRecord)) -> Result<(), PortalError> {
        let mut record = self.lock();
        f(&mut record);
        self.save(&record)
    }
}

fn write_record(path: &Path, record: &RelayRecord) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(record)?)?;
    tmp.persist(path)?;
    Ok(())
}

/// Ask on stderr, answer on stdin. Anything but y/yes declines.
fn prompt_permission() -> std::io::Result<bool> {
    let mut err = std::io::stderr().lock();
    write!(err, "Allow disposisi to show notifications? [y/N] ")?;
    err.flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl PushPlatform for RelayPlatform {
    fn is_supported(&self) -> bool {
        self.config.endpoint.is_some()
    }

    fn permission_state(&self) -> PermissionState {
        if self.config.assume_yes {
            return PermissionState::Granted;
        }
        self.lock().permission.unwrap_or(PermissionState::Prompt)
    }

    async fn request_permission(&self) -> Result<PermissionState, PortalError> {
        let granted = if self.config.assume_yes {
            true
        } else {
            tokio::task::spawn_blocking(prompt_permission)
                .await
                .map_err(|e| PortalError::State(e.to_string()))?
                .map_err(|e| PortalError::State(e.to_string()))?
        };
        let state = if granted {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        self.update(|r| r.permission = Some(state))?;
        info!(permission = state.as_str(), "notification permission recorded");
        Ok(state)
    }

    async fn existing_subscription(&self) -> Result<Option<PushSubscription>, PortalError> {
        let record = self.lock();
        // A record for a relay that is no longer configured is not a subscription.
        Ok(record
            .subscription
            .clone()
            .filter(|s| Some(&s.endpoint) == self.config.endpoint.as_ref()))
    }

    async fn subscribe(&self, key: &ServerKey) -> Result<PushSubscription, PortalError> {
        let endpoint = self.config.endpoint.clone().ok_or(PortalError::Unsupported)?;
        let subscription = PushSubscription {
            endpoint,
            keys: SubscriptionKeys {
                p256dh: self.config.p256dh.clone(),
                auth: self.config.auth.clone(),
            },
            principal_id: String::new(),
        };
        debug!(server_key = key.as_base64url(), endpoint = %subscription.endpoint, "relay subscribed");
        self.update(|r| r.subscription = Some(subscription.clone()))?;
        Ok(subscription)
    }

    async fn unsubscribe(&self, endpoint: &str) -> Result<(), PortalError> {
        self.update(|r| {
            if r.subscription.as_ref().is_some_and(|s| s.endpoint == endpoint) {
                r.subscription = None;
            }
        })
    }
}
