//! HTTP client for the portal backend's disposition and push endpoints.

use async_trait::async_trait;
use disposisi_core::{
    DeliveryReport, Disposition, DocumentId, LedgerBackend, PortalError, Principal,
    PushRegistry, PushSubscription, Role, SubscriptionKeys, TransitionOutcome, TransitionRequest,
};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::retry::{RetryPolicy, with_retry};

/// Client for the disposition and push endpoints.
pub struct PortalClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PublicKeyResponse {
    Wrapped { public_key: String },
    Bare(String),
}

#[derive(Serialize)]
struct SubscriptionBody<'a> {
    endpoint: &'a str,
    keys: &'a SubscriptionKeys,
}

#[derive(Deserialize)]
struct TestPushResponse {
    status: u16,
}

impl PortalClient {
    /// Create a client for the given backend base URL.
    ///
    /// `base_url` should be like `https://portal.example/api` (no trailing slash).
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Session token sent as `Authorization: Bearer`.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, SyncError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, SyncError> {
        let resp = self.send(builder).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `GET /disposition/{role}/inbox`
    pub async fn fetch_inbox(&self, role: Role) -> Result<Vec<Disposition>, SyncError> {
        let path = format!("disposition/{}/inbox", role.as_str());
        debug!(path = %path, "fetching inbox");
        let hops: Vec<Disposition> = self.send_json(self.request(Method::GET, &path)).await?;
        info!(role = %role, count = hops.len(), "fetched inbox");
        Ok(hops)
    }

    /// `GET /disposition/{document_id}/history`
    pub async fn fetch_history(&self, document: DocumentId) -> Result<Vec<Disposition>, SyncError> {
        let path = format!("disposition/{document}/history");
        self.send_json(self.request(Method::GET, &path)).await
    }

    /// `POST /disposition/{document_id}/transition`
    pub async fn post_transition(
        &self,
        document: DocumentId,
        request: &TransitionRequest,
    ) -> Result<TransitionOutcome, SyncError> {
        let path = format!("disposition/{document}/transition");
        info!(
            document = %document,
            hop = %request.hop_id,
            action = %request.action,
            expected = %request.expected_status,
            "posting transition"
        );
        self.send_json(self.request(Method::POST, &path).json(request))
            .await
    }

    /// `GET /push/public-key`
    pub async fn fetch_public_key(&self) -> Result<String, SyncError> {
        let resp: PublicKeyResponse = self
            .send_json(self.request(Method::GET, "push/public-key"))
            .await?;
        Ok(match resp {
            PublicKeyResponse::Wrapped { public_key } => public_key,
            PublicKeyResponse::Bare(key) => key,
        })
    }

    /// `POST /push/subscribe`
    pub async fn post_subscribe(&self, subscription: &PushSubscription) -> Result<(), SyncError> {
        let body = SubscriptionBody {
            endpoint: &subscription.endpoint,
            keys: &subscription.keys,
        };
        self.send(self.request(Method::POST, "push/subscribe").json(&body))
            .await?;
        info!(endpoint = %subscription.endpoint, "push subscription registered");
        Ok(())
    }

    /// `POST /push/unsubscribe`
    pub async fn post_unsubscribe(&self, subscription: &PushSubscription) -> Result<(), SyncError> {
        let body = SubscriptionBody {
            endpoint: &subscription.endpoint,
            keys: &subscription.keys,
        };
        self.send(self.request(Method::POST, "push/unsubscribe").json(&body))
            .await?;
        info!(endpoint = %subscription.endpoint, "push subscription removed");
        Ok(())
    }

    /// `POST /push/test`
    ///
    /// A 404/410 from the backend means the push service rejected the
    /// endpoint; it is reported as a delivery status rather than an error.
    pub async fn post_test(&self, subscription: &PushSubscription) -> Result<DeliveryReport, SyncError> {
        let body = SubscriptionBody {
            endpoint: &subscription.endpoint,
            keys: &subscription.keys,
        };
        let result: Result<TestPushResponse, SyncError> = self
            .send_json(self.request(Method::POST, "push/test").json(&body))
            .await;
        let status = match result {
            Ok(resp) => resp.status,
            Err(SyncError::Server { status, .. }) if matches!(status, 404 | 410) => status,
            Err(e) => return Err(e),
        };
        info!(endpoint = %subscription.endpoint, status, "test push sent");
        Ok(DeliveryReport {
            endpoint: subscription.endpoint.clone(),
            status,
        })
    }
}

#[async_trait]
impl LedgerBackend for PortalClient {
    async fn inbox(&self, role: Role) -> Result<Vec<Disposition>, PortalError> {
        with_retry(&self.retry, "inbox", move || async move {
            self.fetch_inbox(role).await.map_err(PortalError::from)
        })
        .await
    }

    async fn history(&self, document: DocumentId) -> Result<Vec<Disposition>, PortalError> {
        with_retry(&self.retry, "history", move || async move {
            self.fetch_history(document).await.map_err(PortalError::from)
        })
        .await
    }

    /// The backend identifies the principal from the session token; the
    /// principal is used here only for the request log.
    async fn transition(
        &self,
        principal: &Principal,
        document: DocumentId,
        request: &TransitionRequest,
    ) -> Result<TransitionOutcome, PortalError> {
        debug!(principal = %principal.id, role = %principal.role, "transition requested");
        self.post_transition(document, request)
            .await
            .map_err(|e| e.into_portal(Some(request)))
    }
}

#[async_trait]
impl PushRegistry for PortalClient {
    async fn public_key(&self) -> Result<String, PortalError> {
        with_retry(&self.retry, "public-key", move || async move {
            self.fetch_public_key().await.map_err(PortalError::from)
        })
        .await
    }

    async fn register(&self, subscription: &PushSubscription) -> Result<(), PortalError> {
        Ok(self.post_subscribe(subscription).await?)
    }

    async fn unregister(&self, subscription: &PushSubscription) -> Result<(), PortalError> {
        Ok(self.post_unsubscribe(subscription).await?)
    }

    async fn send_test(
        &self,
        subscription: &PushSubscription,
    ) -> Result<DeliveryReport, PortalError> {
        Ok(self.post_test(subscription).await?)
    }
}
