//! `disposisi watch`: live inbox driven by push payloads.
//!
//! Payloads arrive from the relay as JSON lines on stdin. They go through the
//! notification receiver, and ledger events trigger a debounced inbox reload.
//! A slow poll covers a missing or dead subscription.

use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use disposisi_client::{
    AutoReloadCoordinator, Desk, EventFilter, EventHub, FocusFlag, Notice, NotificationReceiver,
    NotificationSink, ReloadOptions, SubscriptionManager,
};
use futures::{Stream, stream};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::display;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Quiet period after the last event before reloading
    #[arg(long, default_value_t = 1000)]
    pub debounce_ms: u64,

    /// Minimum spacing between reloads
    #[arg(long, default_value_t = 1000)]
    pub min_interval_ms: u64,

    /// Fallback poll interval
    #[arg(long, default_value_t = 300)]
    pub poll_secs: u64,

    /// Reload on every push type, not only ledger events
    #[arg(long)]
    pub all_events: bool,
}

impl WatchArgs {
    fn reload_options(&self) -> ReloadOptions {
        ReloadOptions {
            event_types: if self.all_events {
                EventFilter::Any
            } else {
                EventFilter::ledger()
            },
            debounce: Duration::from_millis(self.debounce_ms),
            min_interval: Duration::from_millis(self.min_interval_ms),
        }
    }
}

/// Terminal notifications on stderr, keeping stdout for the inbox.
struct TerminalSink;

impl NotificationSink for TerminalSink {
    fn show(&self, notice: &Notice) -> anyhow::Result<()> {
        let mut err = std::io::stderr().lock();
        writeln!(err, "{}", format_notice(notice))?;
        Ok(())
    }
}

fn format_notice(notice: &Notice) -> String {
    if notice.body.is_empty() {
        format!("** {}", notice.title)
    } else {
        format!("** {}: {}", notice.title, notice.body)
    }
}

fn stdin_payloads() -> Pin<Box<dyn Stream<Item = Vec<u8>> + Send>> {
    let lines = BufReader::new(tokio::io::stdin()).lines();
    Box::pin(stream::unfold(lines, |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some((line.into_bytes(), lines)),
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "relay input failed");
                    return None;
                }
            }
        }
    }))
}

async fn reload(desk: &Desk) -> Result<()> {
    let items = desk.inbox().await?;
    display::print_inbox(&items);
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

pub async fn run(desk: Arc<Desk>, mut manager: SubscriptionManager, args: WatchArgs) -> Result<()> {
    match manager.initialize().await {
        Ok(init) if init.subscribed => info!("push subscription live"),
        Ok(_) => warn!(
            poll_secs = args.poll_secs,
            "no live push subscription, relying on polling"
        ),
        Err(e) => warn!(error = %e, "push initialization failed, relying on polling"),
    }

    let hub = EventHub::default();
    let reload_desk = desk.clone();
    let coordinator =
        AutoReloadCoordinator::spawn(hub.subscribe(), args.reload_options(), move || {
            let desk = reload_desk.clone();
            async move { reload(&desk).await }
        });
    let receiver = NotificationReceiver::new(
        hub.clone(),
        Arc::new(TerminalSink),
        Arc::new(FocusFlag::default()),
    )
    .spawn(stdin_payloads());

    if let Err(e) = reload(&desk).await {
        warn!(error = %e, "initial inbox load failed");
    }

    let mut poll = tokio::time::interval(Duration::from_secs(args.poll_secs.max(1)));
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial load covered it.
    poll.tick().await;

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = poll.tick() => {
                if let Err(e) = reload(&desk).await {
                    warn!(error = %e, "fallback poll failed");
                }
            }
        }
    }

    info!("shutting down");
    let received = receiver.shutdown().await;
    let reloads = coordinator.dispose().await;
    manager.dispose()?;
    info!(
        received = received.received,
        dropped = received.dropped,
        reloads = reloads.reloads,
        failures = reloads.failures,
        "watch stopped"
    );
    Ok(())
}
