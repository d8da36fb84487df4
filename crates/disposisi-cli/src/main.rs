//! disposisi - incoming-letter disposition desk.
//!
//! Works a principal's inbox against the portal backend, manages the push
//! subscription, and watches a push relay for live updates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use disposisi_client::{Desk, FileStateStore, SubscriptionManager};
use disposisi_core::{
    Disposition, DocumentId, HopId, PortalError, Principal, Role, RoleRouter, TransitionRequest,
};
use disposisi_sync::PortalClient;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod display;
mod relay;
mod watch;

/// disposisi - incoming-letter disposition desk
#[derive(Parser, Debug)]
#[command(name = "disposisi")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Backend base URL, e.g. https://portal.example/api
    #[arg(long, env = "DISPOSISI_URL")]
    url: String,

    /// Session token sent as a bearer credential
    #[arg(long, env = "DISPOSISI_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Principal id
    #[arg(long, env = "DISPOSISI_USER")]
    user: String,

    /// Principal role (department_head, secretary, division_head, staff)
    #[arg(long, env = "DISPOSISI_ROLE")]
    role: Role,

    /// Client state file
    #[arg(long, env = "DISPOSISI_STATE", default_value = ".disposisi/state.json")]
    state: PathBuf,

    #[command(flatten)]
    relay: RelayArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Push relay that owns this terminal's push endpoint.
#[derive(Args, Debug, Clone)]
struct RelayArgs {
    /// Relay push endpoint
    #[arg(long, env = "DISPOSISI_PUSH_ENDPOINT")]
    push_endpoint: Option<String>,

    /// Relay P-256 public key (base64url)
    #[arg(long, env = "DISPOSISI_PUSH_P256DH", requires = "push_endpoint")]
    push_p256dh: Option<String>,

    /// Relay auth secret (base64url)
    #[arg(long, env = "DISPOSISI_PUSH_AUTH", requires = "push_endpoint")]
    push_auth: Option<String>,

    /// Allow notifications without prompting
    #[arg(short, long)]
    yes: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List active hops addressed to your role
    #[command(alias = "ls")]
    Inbox,

    /// Show the routing chain of a document
    History {
        /// Document id
        document: u64,
    },

    /// Acknowledge a hop
    Read {
        document: u64,
        hop: u64,
    },

    /// Mark a hop in progress
    Start {
        document: u64,
        hop: u64,
    },

    /// Hand a hop down the chain
    Forward {
        document: u64,
        hop: u64,

        /// Receiving role
        #[arg(long)]
        to: Role,

        /// Instruction for the receiving role
        #[arg(short, long)]
        instruction: String,

        #[arg(long)]
        note: Option<String>,

        /// Deadline (YYYY-MM-DD)
        #[arg(long)]
        deadline: Option<NaiveDate>,
    },

    /// Close a hop
    Complete {
        document: u64,
        hop: u64,

        #[arg(long)]
        note: Option<String>,
    },

    /// Push subscription management
    #[command(subcommand)]
    Push(PushCommands),

    /// Follow the relay and reload the inbox on ledger events
    Watch(watch::WatchArgs),
}

#[derive(Subcommand, Debug)]
enum PushCommands {
    /// Show subscription state
    Status,
    /// Subscribe this terminal to push notifications
    Subscribe,
    /// Remove the subscription on both sides
    Unsubscribe,
    /// Ask the backend to send a test push
    Test,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Attach a next step to errors a user can act on.
fn explain(err: PortalError) -> anyhow::Error {
    let hint = match &err {
        PortalError::Conflict { .. } => {
            Some("the hop changed since it was loaded; check `history` and retry")
        }
        PortalError::Unsupported => Some("no push relay configured; set DISPOSISI_PUSH_ENDPOINT"),
        PortalError::PermissionDenied => Some("notifications were not allowed; rerun with --yes"),
        PortalError::NotSubscribed => Some("run `push subscribe` first"),
        PortalError::Network(_) => Some("backend unreachable; try again later"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => anyhow::Error::new(err),
    }
}

async fn find_hop(desk: &Desk, document: u64, hop: u64) -> Result<Disposition> {
    let hops = desk.history(DocumentId(document)).await.map_err(explain)?;
    hops.into_iter()
        .find(|h| h.id == HopId(hop))
        .ok_or_else(|| anyhow!("document {document} has no hop {hop}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let principal = Principal::new(cli.user.clone(), cli.role);
    debug!(url = %cli.url, user = %principal.id, role = %principal.role, "starting");

    let client = Arc::new(PortalClient::new(cli.url.clone()).with_token(cli.token.clone()));
    let store = Arc::new(FileStateStore::new(&cli.state));
    let desk = Arc::new(Desk::new(
        client.clone(),
        RoleRouter::standard(),
        principal.clone(),
        store.clone(),
    ));

    match cli.command {
        Commands::Inbox => {
            let items = desk.inbox().await.map_err(explain)?;
            display::print_inbox(&items);
        }
        Commands::History { document } => {
            let hops = desk.history(DocumentId(document)).await.map_err(explain)?;
            display::print_history(DocumentId(document), &hops);
        }
        Commands::Read { document, hop } => {
            let hop = find_hop(&desk, document, hop).await?;
            if desk.acknowledge(&hop).await.map_err(explain)? {
                println!("hop {} marked read", hop.id);
            } else {
                println!("hop {} already acknowledged", hop.id);
            }
        }
        Commands::Start { document, hop } => {
            let hop = find_hop(&desk, document, hop).await?;
            let outcome = desk
                .act(&hop, TransitionRequest::start(&hop))
                .await
                .map_err(explain)?;
            display::print_outcome(&outcome);
        }
        Commands::Forward {
            document,
            hop,
            to,
            instruction,
            note,
            deadline,
        } => {
            let hop = find_hop(&desk, document, hop).await?;
            let mut request = TransitionRequest::forward(&hop, to, instruction);
            if let Some(note) = note {
                request = request.with_note(note);
            }
            if let Some(deadline) = deadline {
                request = request.with_deadline(deadline);
            }
            let outcome = desk.act(&hop, request).await.map_err(explain)?;
            display::print_outcome(&outcome);
        }
        Commands::Complete {
            document,
            hop,
            note,
        } => {
            let hop = find_hop(&desk, document, hop).await?;
            let mut request = TransitionRequest::complete(&hop);
            if let Some(note) = note {
                request = request.with_note(note);
            }
            let outcome = desk.act(&hop, request).await.map_err(explain)?;
            display::print_outcome(&outcome);
        }
        Commands::Push(push_cmd) => {
            let platform = open_relay(&cli.relay, &cli.state)?;
            let mut manager =
                SubscriptionManager::new(platform, client.clone(), store.clone(), principal);
            manager.initialize().await.map_err(explain)?;
            let result = run_push(&mut manager, push_cmd).await;
            manager.dispose().map_err(explain)?;
            result?;
        }
        Commands::Watch(args) => {
            let platform = open_relay(&cli.relay, &cli.state)?;
            let manager =
                SubscriptionManager::new(platform, client.clone(), store.clone(), principal);
            watch::run(desk, manager, args).await?;
        }
    }

    Ok(())
}

async fn run_push(manager: &mut SubscriptionManager, command: PushCommands) -> Result<()> {
    match command {
        PushCommands::Status => {
            display::print_push_status(&manager.status(), manager.subscription());
        }
        PushCommands::Subscribe => {
            let sub = manager.subscribe().await.map_err(explain)?;
            println!("subscribed {}", sub.endpoint);
        }
        PushCommands::Unsubscribe => {
            manager.unsubscribe().await.map_err(explain)?;
            println!("unsubscribed");
        }
        PushCommands::Test => {
            let report = manager.send_test().await.map_err(explain)?;
            if report.is_delivered() {
                println!("test push accepted ({})", report.status);
            } else if report.is_gone() {
                println!(
                    "push endpoint gone ({}); run `push subscribe` to resubscribe",
                    report.status
                );
            } else {
                println!("test push rejected ({})", report.status);
            }
        }
    }
    Ok(())
}

fn open_relay(args: &RelayArgs, state: &Path) -> Result<Arc<relay::RelayPlatform>> {
    let config = relay::RelayConfig {
        endpoint: args.push_endpoint.clone(),
        p256dh: args.push_p256dh.clone().unwrap_or_default(),
        auth: args.push_auth.clone().unwrap_or_default(),
        assume_yes: args.yes,
    };
    let platform = relay::RelayPlatform::open(config, relay_path(state))
        .context("failed to open relay record")?;
    Ok(Arc::new(platform))
}

/// Relay record lives next to the client state.
fn relay_path(state: &Path) -> PathBuf {
    state.with_file_name("relay.json")
}
