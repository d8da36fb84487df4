//! Card and table output for dispositions.
//!
//! Renders hops as grouped, human-readable cards: routing, instruction,
//! dates, then the actions the viewer may take.

use disposisi_client::{DeskItem, SubscriptionStatus};
use disposisi_core::{Disposition, DocumentId, PushSubscription, RouteDecision, TransitionOutcome};

const LABEL_WIDTH: usize = 14;
const MAX_INSTRUCTION: usize = 60;

// ── Public API ──

pub fn print_inbox(items: &[DeskItem]) {
    if items.is_empty() {
        println!("inbox empty");
        return;
    }
    println!("=== inbox ({}) ===", items.len());
    println!();
    for item in items {
        for line in card_lines(&item.hop, Some(&item.decision)) {
            println!("{line}");
        }
        println!();
    }
}

pub fn print_history(document: DocumentId, hops: &[Disposition]) {
    println!("=== document {document} ===");
    if hops.is_empty() {
        println!("(no hops)");
        return;
    }
    for hop in hops {
        println!("{}", history_line(hop));
    }
}

pub fn print_outcome(outcome: &TransitionOutcome) {
    println!("hop {} is now {}", outcome.hop.id, outcome.hop.status);
    if let Some(next) = &outcome.next {
        println!("created hop {} for {}", next.id, next.target_role);
    }
}

pub fn print_push_status(status: &SubscriptionStatus, subscription: Option<&PushSubscription>) {
    println!("Push");
    println!("  {:<LABEL_WIDTH$} {}", "supported", yes_no(status.supported));
    println!("  {:<LABEL_WIDTH$} {}", "permission", status.permission_state.as_str());
    println!("  {:<LABEL_WIDTH$} {}", "subscribed", yes_no(status.subscribed));
    if status.needs_resubscribe {
        println!("  {:<LABEL_WIDTH$} yes", "resubscribe");
    }
    if let Some(sub) = subscription {
        println!("  {:<LABEL_WIDTH$} {}", "endpoint", sub.endpoint);
    }
}

// ── Card rendering ──

fn card_lines(hop: &Disposition, decision: Option<&RouteDecision>) -> Vec<String> {
    let mut lines = vec![format!(
        "[doc {} / hop {}] {}",
        hop.document_id, hop.id, hop.status
    )];

    let from = hop.from_role.map_or("intake".to_string(), |r| r.to_string());
    lines.push(field("from", &from));
    lines.push(field("to", hop.target_role.as_str()));
    if !hop.instruction.is_empty() {
        lines.push(field("instruction", &truncate(&hop.instruction, MAX_INSTRUCTION)));
    }
    if let Some(note) = &hop.note {
        lines.push(field("note", note));
    }
    if let Some(deadline) = hop.deadline {
        lines.push(field("deadline", &deadline.to_string()));
    }
    lines.push(field(
        "received",
        &hop.created_at.format("%Y-%m-%d %H:%M").to_string(),
    ));

    if let Some(decision) = decision {
        if decision.read_only {
            lines.push(field("actions", "(read only)"));
        } else {
            let actions: Vec<&str> = decision.actions.iter().map(|a| a.as_str()).collect();
            lines.push(field("actions", &actions.join(", ")));
        }
        if !decision.forward_targets.is_empty() {
            let targets: Vec<&str> = decision.forward_targets.iter().map(|r| r.as_str()).collect();
            lines.push(field("forward to", &targets.join(", ")));
        }
    }
    lines
}

fn history_line(hop: &Disposition) -> String {
    let from = hop.from_role.map_or("intake".to_string(), |r| r.to_string());
    let mut line = format!(
        "  #{:<5} {:<16} -> {:<16} {:<12}",
        hop.id.0,
        from,
        hop.target_role.as_str(),
        hop.status.as_str()
    );
    if !hop.instruction.is_empty() {
        line.push_str(&truncate(&hop.instruction, MAX_INSTRUCTION));
    }
    line.trim_end().to_string()
}

// ── Helpers ──

fn field(label: &str, value: &str) -> String {
    format!("  {label:<LABEL_WIDTH$} {value}")
}

fn yes_no(v: bool) -> &'static str {
    if v { "yes" } else { "no" }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}
