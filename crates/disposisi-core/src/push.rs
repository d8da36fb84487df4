//! Push subscription types and the two seams the subscription manager drives:
//! the local push service ([`PushPlatform`]) and the backend registry
//! ([`PushRegistry`]).

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::PortalError;

/// Length of an uncompressed P-256 public point.
pub const SERVER_KEY_LEN: usize = 65;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    /// Owning principal. Empty until the subscription manager claims it.
    #[serde(default)]
    pub principal_id: String,
}

/// The application server's public key, used when creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKey {
    encoded: String,
    raw: Vec<u8>,
}

impl ServerKey {
    /// Decode a base64url key (padding optional).
    pub fn from_base64url(encoded: &str) -> Result<Self, PortalError> {
        let trimmed = encoded.trim().trim_end_matches('=');
        let raw = URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|e| PortalError::InvalidKey(e.to_string()))?;
        if raw.len() != SERVER_KEY_LEN || raw[0] != 0x04 {
            return Err(PortalError::InvalidKey(format!(
                "expected {SERVER_KEY_LEN}-byte uncompressed P-256 point, got {} bytes",
                raw.len()
            )));
        }
        Ok(Self {
            encoded: trimmed.to_string(),
            raw,
        })
    }

    pub fn as_base64url(&self) -> &str {
        &self.encoded
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet; asking will prompt.
    Prompt,
}

impl PermissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Prompt => "prompt",
        }
    }
}

/// Push service response for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub endpoint: String,
    pub status: u16,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The push service no longer knows this endpoint.
    pub fn is_gone(&self) -> bool {
        matches!(self.status, 404 | 410)
    }
}

/// The local push service (browser/OS or a relay standing in for one).
#[async_trait]
pub trait PushPlatform: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Current permission without prompting.
    fn permission_state(&self) -> PermissionState;

    /// Ask the user. Must only be called from an explicit user gesture.
    async fn request_permission(&self) -> Result<PermissionState, PortalError>;

    async fn existing_subscription(&self) -> Result<Option<PushSubscription>, PortalError>;

    async fn subscribe(&self, key: &ServerKey) -> Result<PushSubscription, PortalError>;

    /// Drop the local registration. Unknown endpoints are not an error.
    async fn unsubscribe(&self, endpoint: &str) -> Result<(), PortalError>;
}

/// Backend endpoints under `/push`.
#[async_trait]
pub trait PushRegistry: Send + Sync {
    async fn public_key(&self) -> Result<String, PortalError>;

    async fn register(&self, subscription: &PushSubscription) -> Result<(), PortalError>;

    async fn unregister(&self, subscription: &PushSubscription) -> Result<(), PortalError>;

    async fn send_test(&self, subscription: &PushSubscription)
    -> Result<DeliveryReport, PortalError>;
}
