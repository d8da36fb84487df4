//! Background push listener.
//!
//! Runs as its own task so it outlives any single view. Each payload is shown
//! as a platform notification when the UI is not focused and broadcast to the
//! [`EventHub`]. Bad payloads and sink failures are logged and dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use disposisi_core::PushMessage;
use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::hub::EventHub;

/// Platform notification content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub title: String,
    pub body: String,
}

pub trait NotificationSink: Send + Sync {
    fn show(&self, notice: &Notice) -> anyhow::Result<()>;
}

pub trait FocusProbe: Send + Sync {
    fn is_focused(&self) -> bool;
}

/// Focus state toggled by the UI.
#[derive(Debug, Clone, Default)]
pub struct FocusFlag(Arc<AtomicBool>);

impl FocusFlag {
    pub fn set(&self, focused: bool) {
        self.0.store(focused, Ordering::Relaxed);
    }
}

impl FocusProbe for FocusFlag {
    fn is_focused(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub received: u64,
    pub broadcast: u64,
    pub shown: u64,
    pub dropped: u64,
}

pub struct NotificationReceiver {
    hub: EventHub,
    sink: Arc<dyn NotificationSink>,
    focus: Arc<dyn FocusProbe>,
}

impl NotificationReceiver {
    pub fn new(hub: EventHub, sink: Arc<dyn NotificationSink>, focus: Arc<dyn FocusProbe>) -> Self {
        Self { hub, sink, focus }
    }

    /// Process one raw payload.
    pub fn handle_payload(&self, raw: &[u8], stats: &mut ReceiverStats) {
        stats.received += 1;
        let message = match PushMessage::parse(raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, bytes = raw.len(), "dropping unparseable push payload");
                stats.dropped += 1;
                return;
            }
        };

        if !self.focus.is_focused() {
            let notice = Notice {
                kind: message.kind.clone(),
                title: message.display_title().to_string(),
                body: message.display_body(),
            };
            match self.sink.show(&notice) {
                Ok(()) => stats.shown += 1,
                Err(e) => warn!(kind = %notice.kind, error = %e, "platform notification failed"),
            }
        }

        self.hub.publish(message.into_event());
        stats.broadcast += 1;
    }

    /// Run the listener over `source` until it ends or the handle shuts it down.
    pub fn spawn<S>(self, source: S) -> ReceiverHandle
    where
        S: Stream<Item = Vec<u8>> + Send + Unpin + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut source = source;
            let mut stats = ReceiverStats::default();
            info!("notification receiver started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("notification receiver shut down");
                        break;
                    }
                    next = source.next() => match next {
                        Some(raw) => self.handle_payload(&raw, &mut stats),
                        None => {
                            debug!("push source ended");
                            break;
                        }
                    }
                }
            }
            info!(
                received = stats.received,
                broadcast = stats.broadcast,
                dropped = stats.dropped,
                "notification receiver stopped"
            );
            stats
        });
        ReceiverHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

pub struct ReceiverHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<ReceiverStats>,
}

impl ReceiverHandle {
    pub async fn shutdown(mut self) -> ReceiverStats {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.join().await
    }

    /// Wait for the source to end.
    pub async fn join(self) -> ReceiverStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "notification receiver task failed");
                ReceiverStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::channel::mpsc;
    use futures::stream;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        shown: Mutex<Vec<Notice>>,
        fail: bool,
    }

    impl NotificationSink for RecordingSink {
        fn show(&self, notice: &Notice) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("notification daemon unavailable");
            }
            self.shown.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    fn payloads(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn broadcasts_and_shows_when_unfocused() {
        let hub = EventHub::default();
        let mut ctx = hub.subscribe();
        let sink = Arc::new(RecordingSink::default());
        let receiver = NotificationReceiver::new(hub.clone(), sink.clone(), Arc::new(FocusFlag::default()));

        let source = stream::iter(payloads(&[
            r#"{"type":"disposition.created","title":"Disposisi baru","body":"Surat 005/12"}"#,
        ]));
        let stats = receiver.spawn(source).join().await;

        assert_eq!(stats.broadcast, 1);
        assert_eq!(stats.shown, 1);
        assert_eq!(ctx.recv().await.unwrap().kind, "disposition.created");
        let shown = sink.shown.lock().unwrap();
        assert_eq!(shown[0].title, "Disposisi baru");
        assert_eq!(shown[0].body, "Surat 005/12");
    }

    #[tokio::test]
    async fn focused_ui_gets_no_platform_notification() {
        let hub = EventHub::default();
        let mut ctx = hub.subscribe();
        let sink = Arc::new(RecordingSink::default());
        let focus = FocusFlag::default();
        focus.set(true);
        let receiver = NotificationReceiver::new(hub.clone(), sink.clone(), Arc::new(focus));

        let stats = receiver
            .spawn(stream::iter(payloads(&[r#"{"type":"disposition.updated"}"#])))
            .join()
            .await;

        assert_eq!(stats.shown, 0);
        assert!(sink.shown.lock().unwrap().is_empty());
        assert_eq!(ctx.recv().await.unwrap().kind, "disposition.updated");
    }

    #[tokio::test]
    async fn bad_payloads_are_dropped_without_stopping() {
        let hub = EventHub::default();
        let mut ctx = hub.subscribe();
        let receiver = NotificationReceiver::new(
            hub.clone(),
            Arc::new(RecordingSink::default()),
            Arc::new(FocusFlag::default()),
        );

        let stats = receiver
            .spawn(stream::iter(payloads(&[
                "garbage",
                r#"{"title":"no type"}"#,
                r#"{"type":"disposition.completed"}"#,
            ])))
            .join()
            .await;

        assert_eq!(stats.received, 3);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.broadcast, 1);
        assert_eq!(ctx.recv().await.unwrap().kind, "disposition.completed");
    }

    #[tokio::test]
    async fn sink_failure_still_broadcasts() {
        let hub = EventHub::default();
        let mut ctx = hub.subscribe();
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let receiver = NotificationReceiver::new(hub.clone(), sink, Arc::new(FocusFlag::default()));

        let stats = receiver
            .spawn(stream::iter(payloads(&[r#"{"type":"document.received"}"#])))
            .join()
            .await;

        assert_eq!(stats.shown, 0);
        assert_eq!(stats.broadcast, 1);
        assert!(ctx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_stops_an_open_source() {
        let hub = EventHub::default();
        let receiver = NotificationReceiver::new(
            hub,
            Arc::new(RecordingSink::default()),
            Arc::new(FocusFlag::default()),
        );
        let (tx, rx) = mpsc::unbounded::<Vec<u8>>();
        let handle = receiver.spawn(rx);
        tx.unbounded_send(br#"{"type":"push.test"}"#.to_vec()).unwrap();
        tokio::task::yield_now().await;

        let stats = handle.shutdown().await;
        assert!(stats.received <= 1);
        drop(tx);
    }
}
