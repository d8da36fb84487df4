//! Debounced, rate-limited reload driven by notification events.
//!
//! A qualifying event (re)arms a debounce deadline measured from the last
//! qualifying event. When the deadline passes, the reload runs unless the
//! previous reload started less than `min_interval` ago, in which case it is
//! deferred to the end of that interval. Bursts therefore collapse into one
//! reload and reloads are never closer than `min_interval`.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use disposisi_core::NotificationEvent;
use disposisi_core::event::LEDGER_EVENTS;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    Any,
    Only(HashSet<String>),
}

impl EventFilter {
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(types.into_iter().map(Into::into).collect())
    }

    /// Events that change inbox contents.
    pub fn ledger() -> Self {
        Self::only(LEDGER_EVENTS.iter().copied())
    }

    pub fn matches(&self, kind: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(types) => types.contains(kind),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReloadOptions {
    pub event_types: EventFilter,
    pub debounce: Duration,
    pub min_interval: Duration,
}

impl Default for ReloadOptions {
    fn default() -> Self {
        Self {
            event_types: EventFilter::Any,
            debounce: Duration::from_secs(1),
            min_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadStats {
    pub qualifying: u64,
    pub ignored: u64,
    pub reloads: u64,
    pub failures: u64,
}

/// Owns the reload task. Dropping it cancels any pending reload.
pub struct AutoReloadCoordinator {
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<ReloadStats>>,
}

impl AutoReloadCoordinator {
    pub fn spawn<F, Fut>(
        mut events: broadcast::Receiver<NotificationEvent>,
        options: ReloadOptions,
        mut on_reload: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut stats = ReloadStats::default();
            let mut pending: Option<Instant> = None;
            let mut last_reload: Option<Instant> = None;
            let mut open = true;

            loop {
                let deadline = pending;
                tokio::select! {
                    biased;

                    _ = &mut cancel_rx => {
                        debug!(pending = pending.is_some(), "reload coordinator disposed");
                        break;
                    }

                    recv = events.recv(), if open => match recv {
                        Ok(event) => {
                            if options.event_types.matches(&event.kind) {
                                stats.qualifying += 1;
                                pending = Some(Instant::now() + options.debounce);
                            } else {
                                stats.ignored += 1;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "event stream lagged, scheduling reload");
                            stats.qualifying += 1;
                            pending = Some(Instant::now() + options.debounce);
                        }
                        Err(RecvError::Closed) => {
                            open = false;
                            if pending.is_none() {
                                break;
                            }
                        }
                    },

                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        let now = Instant::now();
                        if let Some(last) = last_reload {
                            let earliest = last + options.min_interval;
                            if now < earliest {
                                debug!(
                                    wait_ms = (earliest - now).as_millis() as u64,
                                    "reload deferred"
                                );
                                pending = Some(earliest);
                                continue;
                            }
                        }

                        pending = None;
                        last_reload = Some(now);
                        tokio::select! {
                            biased;
                            _ = &mut cancel_rx => {
                                debug!("reload cancelled in flight");
                                break;
                            }
                            result = on_reload() => match result {
                                Ok(()) => stats.reloads += 1,
                                Err(e) => {
                                    stats.failures += 1;
                                    warn!(error = %e, "reload failed");
                                }
                            }
                        }

                        if !open && pending.is_none() {
                            break;
                        }
                    }
                }
            }

            info!(
                reloads = stats.reloads,
                failures = stats.failures,
                qualifying = stats.qualifying,
                "reload coordinator stopped"
            );
            stats
        });

        Self {
            cancel: Some(cancel_tx),
            task: Some(task),
        }
    }

    /// Cancel any pending reload and wait for the task to stop.
    pub async fn dispose(mut self) -> ReloadStats {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        match self.task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => ReloadStats::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for AutoReloadCoordinator {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::Value;

    use super::*;
    use crate::hub::EventHub;

    type Log = Arc<Mutex<Vec<Instant>>>;

    fn recorder(log: &Log) -> impl FnMut() -> std::future::Ready<anyhow::Result<()>> + Send + 'static {
        let log = Arc::clone(log);
        move || {
            log.lock().unwrap().push(Instant::now());
            std::future::ready(Ok(()))
        }
    }

    fn event(kind: &str) -> NotificationEvent {
        NotificationEvent::new(kind, Value::Null)
    }

    fn options(debounce_ms: u64, min_interval_ms: u64) -> ReloadOptions {
        ReloadOptions {
            event_types: EventFilter::ledger(),
            debounce: Duration::from_millis(debounce_ms),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_reload_after_last_event() {
        let hub = EventHub::default();
        let log: Log = Arc::default();
        let coordinator = AutoReloadCoordinator::spawn(hub.subscribe(), options(1000, 1000), recorder(&log));

        let mut last_event = Instant::now();
        for _ in 0..5 {
            hub.publish(event("disposition.created"));
            last_event = Instant::now();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        let reloads = log.lock().unwrap().clone();
        assert_eq!(reloads.len(), 1);
        assert!(reloads[0] >= last_event + Duration::from_millis(1000));

        let stats = coordinator.dispose().await;
        assert_eq!(stats.qualifying, 5);
        assert_eq!(stats.reloads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reloads_are_spaced_by_min_interval_and_deferred_not_dropped() {
        let hub = EventHub::default();
        let log: Log = Arc::default();
        let start = Instant::now();
        let coordinator = AutoReloadCoordinator::spawn(hub.subscribe(), options(10, 1000), recorder(&log));

        hub.publish(event("disposition.updated"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        hub.publish(event("disposition.updated"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        hub.publish(event("disposition.updated"));
        tokio::time::sleep(Duration::from_secs(3)).await;

        let reloads = log.lock().unwrap().clone();
        assert_eq!(reloads.len(), 2);
        assert!(reloads[0] >= start + Duration::from_millis(10));
        assert!(reloads[0] < start + Duration::from_millis(100));
        assert!(reloads[1] >= reloads[0] + Duration::from_millis(1000));

        coordinator.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn uninteresting_events_are_ignored() {
        let hub = EventHub::default();
        let log: Log = Arc::default();
        let coordinator = AutoReloadCoordinator::spawn(hub.subscribe(), options(10, 10), recorder(&log));

        hub.publish(event("push.test"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(log.lock().unwrap().is_empty());

        let stats = coordinator.dispose().await;
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.reloads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disposal_cancels_pending_reload() {
        let hub = EventHub::default();
        let log: Log = Arc::default();
        let coordinator = AutoReloadCoordinator::spawn(hub.subscribe(), options(1000, 1000), recorder(&log));

        hub.publish(event("disposition.created"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        let stats = coordinator.dispose().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(stats.reloads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let hub = EventHub::default();
        let log: Log = Arc::default();
        {
            let _coordinator =
                AutoReloadCoordinator::spawn(hub.subscribe(), options(1000, 1000), recorder(&log));
            hub.publish(event("disposition.created"));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reload_is_swallowed() {
        let hub = EventHub::default();
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&attempts);
        let coordinator = AutoReloadCoordinator::spawn(hub.subscribe(), options(10, 10), move || {
            *counter.lock().unwrap() += 1;
            std::future::ready(Err(anyhow::anyhow!("backend unavailable")))
        });

        hub.publish(event("disposition.created"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        hub.publish(event("disposition.created"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = coordinator.dispose().await;
        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(stats.failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_reload_fires_after_hub_closes() {
        let hub = EventHub::default();
        let log: Log = Arc::default();
        let coordinator = AutoReloadCoordinator::spawn(hub.subscribe(), options(100, 100), recorder(&log));

        hub.publish(event("document.received"));
        drop(hub);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(coordinator.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn disposal_abandons_a_reload_in_flight() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hub = EventHub::default();
        let started = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let on_reload = {
            let started = Arc::clone(&started);
            let completed = Arc::clone(&completed);
            move || {
                let started = Arc::clone(&started);
                let completed = Arc::clone(&completed);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };
        let coordinator = AutoReloadCoordinator::spawn(hub.subscribe(), options(10, 10), on_reload);

        hub.publish(event("disposition.updated"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        let stats = coordinator.dispose().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(completed.load(Ordering::SeqCst), 0);
        assert_eq!(stats.qualifying, 1);
        assert_eq!(stats.reloads, 0);
        assert_eq!(stats.failures, 0);
    }
}
