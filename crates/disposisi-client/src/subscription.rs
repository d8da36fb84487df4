//! Push subscription lifecycle.
//!
//! One explicit instance per principal, constructed with its platform,
//! registry and state store. The manager is the only writer of the stored
//! subscription record.

use std::sync::Arc;

use disposisi_core::{
    DeliveryReport, PermissionState, PortalError, Principal, PushPlatform, PushRegistry,
    PushSubscription, ServerKey,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::state::{ClientState, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitOutcome {
    pub supported: bool,
    pub subscribed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    pub supported: bool,
    pub subscribed: bool,
    pub permission_state: PermissionState,
    pub needs_resubscribe: bool,
}

pub struct SubscriptionManager {
    platform: Arc<dyn PushPlatform>,
    registry: Arc<dyn PushRegistry>,
    store: Arc<dyn StateStore>,
    principal: Principal,
    server_key: Option<ServerKey>,
    state: ClientState,
    disposed: bool,
}

impl SubscriptionManager {
    pub fn new(
        platform: Arc<dyn PushPlatform>,
        registry: Arc<dyn PushRegistry>,
        store: Arc<dyn StateStore>,
        principal: Principal,
    ) -> Self {
        Self {
            platform,
            registry,
            store,
            principal,
            server_key: None,
            state: ClientState::default(),
            disposed: false,
        }
    }

    fn ensure_live(&self) -> Result<(), PortalError> {
        if self.disposed {
            return Err(PortalError::Disposed);
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), PortalError> {
        self.store.save(&self.state)
    }

    async fn server_key(&mut self) -> Result<ServerKey, PortalError> {
        if let Some(key) = &self.server_key {
            return Ok(key.clone());
        }
        let encoded = self.registry.public_key().await?;
        let key = ServerKey::from_base64url(&encoded)?;
        self.server_key = Some(key.clone());
        Ok(key)
    }

    /// Load state, fetch the server key and reconcile with any existing
    /// platform subscription. Unsupported platforms report `supported: false`.
    pub async fn initialize(&mut self) -> Result<InitOutcome, PortalError> {
        self.ensure_live()?;
        self.state = self.store.load()?;

        if !self.platform.is_supported() {
            info!("push not supported on this platform");
            return Ok(InitOutcome {
                supported: false,
                subscribed: false,
            });
        }

        self.server_key().await?;

        let existing = self.platform.existing_subscription().await?;
        match existing {
            Some(sub) if self.state.needs_resubscribe => {
                // The endpoint was reported dead; the local registration is stale.
                debug!(endpoint = %sub.endpoint, "discarding stale platform subscription");
                if let Err(e) = self.platform.unsubscribe(&sub.endpoint).await {
                    warn!(error = %e, "failed to drop stale platform subscription");
                }
            }
            Some(sub) if self.interrupted_unsubscribe(&sub) => {
                info!(endpoint = %sub.endpoint, "finishing interrupted unsubscribe");
                if let Err(e) = self.tear_down(Some(sub), true).await {
                    warn!(error = %e, "unsubscribe still incomplete");
                }
            }
            Some(mut sub) => {
                sub.principal_id = self.principal.id.clone();
                let known = self
                    .state
                    .subscription
                    .as_ref()
                    .is_some_and(|s| s.endpoint == sub.endpoint);
                if !known {
                    info!(endpoint = %sub.endpoint, "adopting existing platform subscription");
                    self.registry.register(&sub).await?;
                }
                self.state.subscription = Some(sub);
                self.state.subscription_valid = true;
            }
            None => {
                if self.state.subscription_valid {
                    warn!("platform subscription disappeared, resubscribe required");
                    self.state.invalidate_subscription();
                } else if !self.state.needs_resubscribe
                    && let Some(record) = self.state.subscription.clone()
                {
                    info!(endpoint = %record.endpoint, "finishing interrupted unsubscribe");
                    if let Err(e) = self.tear_down(Some(record), true).await {
                        warn!(error = %e, "unsubscribe still incomplete");
                    }
                }
            }
        }

        self.persist()?;
        let subscribed = self.state.live_subscription().is_some();
        info!(subscribed, "subscription manager initialized");
        Ok(InitOutcome {
            supported: true,
            subscribed,
        })
    }

    /// A stored record for this endpoint that is not valid and not awaiting
    /// resubscribe is left over from an unsubscribe that did not finish.
    fn interrupted_unsubscribe(&self, sub: &PushSubscription) -> bool {
        !self.state.subscription_valid
            && !self.state.needs_resubscribe
            && self
                .state
                .subscription
                .as_ref()
                .is_some_and(|s| s.endpoint == sub.endpoint)
    }

    /// Prompt for permission if needed, subscribe with the push service and
    /// register the subscription for the principal.
    pub async fn subscribe(&mut self) -> Result<PushSubscription, PortalError> {
        self.ensure_live()?;
        if !self.platform.is_supported() {
            return Err(PortalError::Unsupported);
        }

        let permission = match self.platform.permission_state() {
            PermissionState::Prompt => self.platform.request_permission().await?,
            other => other,
        };
        if permission != PermissionState::Granted {
            info!(permission = permission.as_str(), "push permission not granted");
            return Err(PortalError::PermissionDenied);
        }

        let key = self.server_key().await?;
        let mut sub = self.platform.subscribe(&key).await?;
        sub.principal_id = self.principal.id.clone();

        if let Err(e) = self.registry.register(&sub).await {
            warn!(endpoint = %sub.endpoint, error = %e, "server registration failed, rolling back");
            if let Err(rollback) = self.platform.unsubscribe(&sub.endpoint).await {
                warn!(error = %rollback, "rollback of platform subscription failed");
            }
            return Err(e);
        }

        self.state.subscription = Some(sub.clone());
        self.state.subscription_valid = true;
        self.state.needs_resubscribe = false;
        self.persist()?;
        info!(endpoint = %sub.endpoint, principal = %self.principal.id, "subscribed to push");
        Ok(sub)
    }

    /// Remove the local and server registrations. Either side being gone already is fine.
    pub async fn unsubscribe(&mut self) -> Result<(), PortalError> {
        self.ensure_live()?;
        let supported = self.platform.is_supported();

        let local = if supported {
            match self.platform.existing_subscription().await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(error = %e, "could not read platform subscription");
                    None
                }
            }
        } else {
            None
        };
        let target = local.or_else(|| self.state.subscription.clone());
        self.tear_down(target, supported).await
    }

    /// Remove `target` from both sides. On partial failure the record is kept,
    /// marked invalid, so a later call can reach the side that failed.
    async fn tear_down(
        &mut self,
        target: Option<PushSubscription>,
        supported: bool,
    ) -> Result<(), PortalError> {
        let mut failure: Option<PortalError> = None;
        if let Some(sub) = &target {
            if supported {
                match self.platform.unsubscribe(&sub.endpoint).await {
                    Ok(()) => {}
                    Err(e) if e.is_gone() => debug!("platform subscription already gone"),
                    Err(e) => failure = Some(e),
                }
            }
            match self.registry.unregister(sub).await {
                Ok(()) => {}
                Err(e) if e.is_gone() => debug!("server subscription already gone"),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        self.state.subscription_valid = false;
        self.state.needs_resubscribe = false;
        match failure {
            None => {
                self.state.subscription = None;
                self.persist()?;
                info!("unsubscribed from push");
                Ok(())
            }
            Some(e) => {
                self.state.subscription = target;
                self.persist()?;
                Err(e)
            }
        }
    }

    /// Current state without side effects.
    pub fn status(&self) -> SubscriptionStatus {
        let supported = !self.disposed && self.platform.is_supported();
        SubscriptionStatus {
            supported,
            subscribed: supported && self.state.live_subscription().is_some(),
            permission_state: if supported {
                self.platform.permission_state()
            } else {
                PermissionState::Denied
            },
            needs_resubscribe: self.state.needs_resubscribe,
        }
    }

    pub fn subscription(&self) -> Option<&PushSubscription> {
        self.state.live_subscription()
    }

    /// Feed a push-service delivery result back into the lifecycle.
    ///
    /// A gone endpoint (404/410) kills the stored subscription.
    pub async fn report_delivery(&mut self, report: &DeliveryReport) -> Result<(), PortalError> {
        self.ensure_live()?;
        if !report.is_gone() {
            return Ok(());
        }
        let matches = self
            .state
            .subscription
            .as_ref()
            .is_some_and(|s| s.endpoint == report.endpoint);
        if !matches {
            debug!(endpoint = %report.endpoint, "delivery failure for unknown endpoint");
            return Ok(());
        }

        warn!(
            endpoint = %report.endpoint,
            status = report.status,
            "push endpoint gone, subscription invalidated"
        );
        self.state.invalidate_subscription();
        self.persist()?;
        if self.platform.is_supported()
            && let Err(e) = self.platform.unsubscribe(&report.endpoint).await
        {
            debug!(error = %e, "local cleanup of dead endpoint failed");
        }
        Ok(())
    }

    /// Ask the backend to push a test message to the live subscription.
    pub async fn send_test(&mut self) -> Result<DeliveryReport, PortalError> {
        self.ensure_live()?;
        let sub = self
            .state
            .live_subscription()
            .cloned()
            .ok_or(PortalError::NotSubscribed)?;
        let report = self.registry.send_test(&sub).await?;
        self.report_delivery(&report).await?;
        Ok(report)
    }

    /// Flush state and end the instance.
    pub fn dispose(&mut self) -> Result<(), PortalError> {
        if self.disposed {
            return Ok(());
        }
        self.persist()?;
        self.server_key = None;
        self.disposed = true;
        debug!("subscription manager disposed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use disposisi_core::{Role, SubscriptionKeys};

    use super::*;
    use crate::state::MemoryStateStore;

    const ENDPOINT: &str = "https://push.example/send/abc";

    fn server_key() -> String {
        let mut raw = vec![0x04u8];
        raw.extend(std::iter::repeat_n(7u8, 64));
        URL_SAFE_NO_PAD.encode(raw)
    }

    struct FakePlatform {
        supported: bool,
        permission: Mutex<PermissionState>,
        answer: PermissionState,
        current: Mutex<Option<PushSubscription>>,
        prompts: Mutex<u32>,
        busy: Mutex<bool>,
    }

    impl FakePlatform {
        fn new(permission: PermissionState, answer: PermissionState) -> Self {
            Self {
                supported: true,
                permission: Mutex::new(permission),
                answer,
                current: Mutex::new(None),
                prompts: Mutex::new(0),
                busy: Mutex::new(false),
            }
        }

        fn unsupported() -> Self {
            Self {
                supported: false,
                ..Self::new(PermissionState::Prompt, PermissionState::Denied)
            }
        }
    }

    #[async_trait]
    impl PushPlatform for FakePlatform {
        fn is_supported(&self) -> bool {
            self.supported
        }

        fn permission_state(&self) -> PermissionState {
            *self.permission.lock().unwrap()
        }

        async fn request_permission(&self) -> Result<PermissionState, PortalError> {
            *self.prompts.lock().unwrap() += 1;
            *self.permission.lock().unwrap() = self.answer;
            Ok(self.answer)
        }

        async fn existing_subscription(&self) -> Result<Option<PushSubscription>, PortalError> {
            Ok(self.current.lock().unwrap().clone())
        }

        async fn subscribe(&self, key: &ServerKey) -> Result<PushSubscription, PortalError> {
            assert_eq!(key.as_bytes().len(), 65);
            let sub = PushSubscription {
                endpoint: ENDPOINT.into(),
                keys: SubscriptionKeys {
                    p256dh: "BPk".into(),
                    auth: "c2Vj".into(),
                },
                principal_id: String::new(),
            };
            *self.current.lock().unwrap() = Some(sub.clone());
            Ok(sub)
        }

        async fn unsubscribe(&self, _endpoint: &str) -> Result<(), PortalError> {
            if *self.busy.lock().unwrap() {
                return Err(PortalError::Network("platform busy".into()));
            }
            self.current.lock().unwrap().take();
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        registered: Mutex<Vec<PushSubscription>>,
        unregister_calls: Mutex<u32>,
        tests_sent: Mutex<u32>,
        test_status: Mutex<u16>,
        fail_register: bool,
        gone_on_unregister: bool,
    }

    #[async_trait]
    impl PushRegistry for FakeRegistry {
        async fn public_key(&self) -> Result<String, PortalError> {
            Ok(server_key())
        }

        async fn register(&self, subscription: &PushSubscription) -> Result<(), PortalError> {
            if self.fail_register {
                return Err(PortalError::Network("backend down".into()));
            }
            self.registered.lock().unwrap().push(subscription.clone());
            Ok(())
        }

        async fn unregister(&self, subscription: &PushSubscription) -> Result<(), PortalError> {
            *self.unregister_calls.lock().unwrap() += 1;
            if self.gone_on_unregister {
                return Err(PortalError::NotFound("subscription".into()));
            }
            self.registered
                .lock()
                .unwrap()
                .retain(|s| s.endpoint != subscription.endpoint);
            Ok(())
        }

        async fn send_test(
            &self,
            subscription: &PushSubscription,
        ) -> Result<DeliveryReport, PortalError> {
            *self.tests_sent.lock().unwrap() += 1;
            Ok(DeliveryReport {
                endpoint: subscription.endpoint.clone(),
                status: *self.test_status.lock().unwrap(),
            })
        }
    }

    fn manager(
        platform: Arc<FakePlatform>,
        registry: Arc<FakeRegistry>,
        store: Arc<MemoryStateStore>,
    ) -> SubscriptionManager {
        SubscriptionManager::new(
            platform,
            registry,
            store,
            Principal::new("u-sec", Role::Secretary),
        )
    }

    fn granted() -> Arc<FakePlatform> {
        Arc::new(FakePlatform::new(
            PermissionState::Prompt,
            PermissionState::Granted,
        ))
    }

    #[tokio::test]
    async fn unsupported_platform_initializes_without_error() {
        let mut mgr = manager(
            Arc::new(FakePlatform::unsupported()),
            Arc::default(),
            Arc::default(),
        );
        let outcome = mgr.initialize().await.unwrap();
        assert_eq!(
            outcome,
            InitOutcome {
                supported: false,
                subscribed: false
            }
        );
        assert_eq!(mgr.subscribe().await.unwrap_err(), PortalError::Unsupported);
        assert!(!mgr.status().supported);
    }

    #[tokio::test]
    async fn subscribe_prompts_and_registers() {
        let platform = granted();
        let registry = Arc::new(FakeRegistry::default());
        let store = Arc::new(MemoryStateStore::default());
        let mut mgr = manager(platform.clone(), registry.clone(), store.clone());

        mgr.initialize().await.unwrap();
        let sub = mgr.subscribe().await.unwrap();

        assert_eq!(sub.principal_id, "u-sec");
        assert_eq!(*platform.prompts.lock().unwrap(), 1);
        assert_eq!(registry.registered.lock().unwrap().len(), 1);
        let status = mgr.status();
        assert!(status.subscribed);
        assert_eq!(status.permission_state, PermissionState::Granted);
        assert!(store.snapshot().subscription_valid);
    }

    #[tokio::test]
    async fn declined_permission_is_permission_denied() {
        let platform = Arc::new(FakePlatform::new(
            PermissionState::Prompt,
            PermissionState::Denied,
        ));
        let registry = Arc::new(FakeRegistry::default());
        let mut mgr = manager(platform, registry.clone(), Arc::default());
        mgr.initialize().await.unwrap();

        assert_eq!(mgr.subscribe().await.unwrap_err(), PortalError::PermissionDenied);
        assert!(registry.registered.lock().unwrap().is_empty());
        assert!(!mgr.status().subscribed);
    }

    #[tokio::test]
    async fn blocked_permission_does_not_prompt() {
        let platform = Arc::new(FakePlatform::new(
            PermissionState::Denied,
            PermissionState::Granted,
        ));
        let mut mgr = manager(platform.clone(), Arc::default(), Arc::default());
        assert_eq!(mgr.subscribe().await.unwrap_err(), PortalError::PermissionDenied);
        assert_eq!(*platform.prompts.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_registration_rolls_back_local_subscription() {
        let platform = granted();
        let registry = Arc::new(FakeRegistry {
            fail_register: true,
            ..FakeRegistry::default()
        });
        let mut mgr = manager(platform.clone(), registry, Arc::default());

        let err = mgr.subscribe().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(platform.current.lock().unwrap().is_none());
        assert!(!mgr.status().subscribed);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let platform = granted();
        let registry = Arc::new(FakeRegistry::default());
        let mut mgr = manager(platform.clone(), registry.clone(), Arc::default());
        mgr.subscribe().await.unwrap();

        mgr.unsubscribe().await.unwrap();
        assert!(platform.current.lock().unwrap().is_none());
        assert!(registry.registered.lock().unwrap().is_empty());

        mgr.unsubscribe().await.unwrap();
        assert!(!mgr.status().subscribed);
    }

    #[tokio::test]
    async fn unsubscribe_tolerates_server_side_gone() {
        let platform = granted();
        let registry = Arc::new(FakeRegistry {
            gone_on_unregister: true,
            ..FakeRegistry::default()
        });
        let mut mgr = manager(platform, registry.clone(), Arc::default());
        mgr.subscribe().await.unwrap();

        mgr.unsubscribe().await.unwrap();
        assert_eq!(*registry.unregister_calls.lock().unwrap(), 1);
        assert!(mgr.subscription().is_none());
    }

    #[tokio::test]
    async fn dead_endpoint_requires_resubscribe_and_stops_pushes() {
        let platform = granted();
        let registry = Arc::new(FakeRegistry::default());
        let store = Arc::new(MemoryStateStore::default());
        let mut mgr = manager(platform, registry.clone(), store.clone());
        mgr.initialize().await.unwrap();
        mgr.subscribe().await.unwrap();

        *registry.test_status.lock().unwrap() = 410;
        let report = mgr.send_test().await.unwrap();
        assert!(report.is_gone());

        let status = mgr.status();
        assert!(!status.subscribed);
        assert!(status.needs_resubscribe);
        assert!(store.snapshot().needs_resubscribe);

        assert_eq!(mgr.send_test().await.unwrap_err(), PortalError::NotSubscribed);
        assert_eq!(*registry.tests_sent.lock().unwrap(), 1);

        mgr.subscribe().await.unwrap();
        assert!(!mgr.status().needs_resubscribe);
    }

    #[tokio::test]
    async fn delivery_report_for_other_endpoint_is_ignored() {
        let mut mgr = manager(granted(), Arc::default(), Arc::default());
        mgr.subscribe().await.unwrap();
        mgr.report_delivery(&DeliveryReport {
            endpoint: "https://push.example/other".into(),
            status: 410,
        })
        .await
        .unwrap();
        assert!(mgr.status().subscribed);
    }

    #[tokio::test]
    async fn initialize_restores_persisted_subscription() {
        let platform = granted();
        let registry = Arc::new(FakeRegistry::default());
        let store = Arc::new(MemoryStateStore::default());
        {
            let mut first = manager(platform.clone(), registry.clone(), store.clone());
            first.subscribe().await.unwrap();
            first.dispose().unwrap();
            assert_eq!(first.subscribe().await.unwrap_err(), PortalError::Disposed);
        }

        let mut second = manager(platform, registry.clone(), store);
        let outcome = second.initialize().await.unwrap();
        assert!(outcome.subscribed);
        assert_eq!(registry.registered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lost_platform_subscription_flags_resubscribe() {
        let platform = granted();
        let store = Arc::new(MemoryStateStore::default());
        {
            let mut first = manager(platform.clone(), Arc::default(), store.clone());
            first.subscribe().await.unwrap();
        }
        platform.current.lock().unwrap().take();

        let mut second = manager(platform, Arc::default(), store);
        let outcome = second.initialize().await.unwrap();
        assert!(!outcome.subscribed);
        assert!(second.status().needs_resubscribe);
    }

    #[tokio::test]
    async fn status_has_no_side_effects() {
        let platform = granted();
        let mgr = manager(platform.clone(), Arc::default(), Arc::default());
        let status = mgr.status();
        assert_eq!(status.permission_state, PermissionState::Prompt);
        assert_eq!(*platform.prompts.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn interrupted_unsubscribe_is_finished_not_revived() {
        let platform = granted();
        let registry = Arc::new(FakeRegistry::default());
        let store = Arc::new(MemoryStateStore::default());
        {
            let mut first = manager(platform.clone(), registry.clone(), store.clone());
            first.subscribe().await.unwrap();
            *platform.busy.lock().unwrap() = true;
            assert_eq!(
                first.unsubscribe().await.unwrap_err(),
                PortalError::Network("platform busy".into())
            );
            assert!(registry.registered.lock().unwrap().is_empty());
        }

        // Platform still failing: the record stays dead, nothing re-registers.
        let mut second = manager(platform.clone(), registry.clone(), store.clone());
        let outcome = second.initialize().await.unwrap();
        assert!(!outcome.subscribed);
        assert!(!second.status().subscribed);
        assert!(registry.registered.lock().unwrap().is_empty());

        *platform.busy.lock().unwrap() = false;
        let mut third = manager(platform.clone(), registry.clone(), store.clone());
        third.initialize().await.unwrap();
        let status = third.status();
        assert!(!status.subscribed);
        assert!(!status.needs_resubscribe);
        assert!(platform.current.lock().unwrap().is_none());
        assert!(store.snapshot().subscription.is_none());
        assert!(registry.registered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_platform_subscription_is_dropped_after_dead_endpoint() {
        let platform = granted();
        let registry = Arc::new(FakeRegistry::default());
        let store = Arc::new(MemoryStateStore::default());
        {
            let mut first = manager(platform.clone(), registry.clone(), store.clone());
            first.subscribe().await.unwrap();
            *registry.test_status.lock().unwrap() = 410;
            // Local cleanup fails, so the platform keeps the dead endpoint.
            *platform.busy.lock().unwrap() = true;
            first.send_test().await.unwrap();
            assert!(platform.current.lock().unwrap().is_some());
        }

        *platform.busy.lock().unwrap() = false;
        let mut second = manager(platform.clone(), registry.clone(), store);
        let outcome = second.initialize().await.unwrap();
        assert!(!outcome.subscribed);
        assert!(platform.current.lock().unwrap().is_none());
        let status = second.status();
        assert!(!status.subscribed);
        assert!(status.needs_resubscribe);
        assert_eq!(registry.registered.lock().unwrap().len(), 1);
    }
}
