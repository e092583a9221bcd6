use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info};
use poll_live::api::RestStore;
use poll_live::config::Config;
use poll_live::identity::StaticIdentity;
use poll_live::storage::FileStore;
use poll_live::websocket::WsRealtime;
use poll_live::{SessionError, SessionSnapshot, VoteAggregationSession};
use std::sync::Arc;

/// Watch a poll's results and viewers live, optionally casting a vote first.
#[derive(Parser, Debug)]
#[command(name = "poll-live", version)]
struct Args {
    /// Poll to watch.
    poll_id: String,

    /// Option to vote for; repeat for multi-select polls.
    #[arg(long = "vote", value_name = "OPTION")]
    votes: Vec<String>,

    /// Authenticated user id (overrides POLL_LIVE_USER_ID).
    #[arg(long)]
    user: Option<String>,
}

fn render(snapshot: &SessionSnapshot) {
    let Some(poll) = &snapshot.poll else {
        return;
    };
    let now = Utc::now();

    println!("== {}", poll.question);
    if snapshot.is_ended(now) {
        println!("(voting ended)");
    }
    if !snapshot.results_visible(now) {
        println!("Results are hidden until you vote.");
        return;
    }

    println!("{} viewing", snapshot.active_viewers);
    if snapshot.total_votes == 0 {
        println!("No votes yet. Be the first to vote!");
    }
    for row in snapshot.rows() {
        println!("  {}: {} votes ({}%)", row.name, row.value, row.percent);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = Config::from_env().context("failed to read POLL_LIVE_* configuration")?;

    let store = RestStore::new(
        &config.rest_url,
        &config.api_key,
        config.access_token.clone(),
        config.request_timeout(),
    )?;
    let realtime = WsRealtime::new(
        &config.realtime_url(),
        &config.api_key,
        config.access_token.clone(),
        config.reconnect_policy(),
        config.heartbeat(),
    )?;
    let local = FileStore::open(&config.store_path)
        .with_context(|| format!("failed to open store {}", config.store_path))?;
    info!("Using local store {}", local.path().display());
    let identity = StaticIdentity(args.user.clone().or_else(|| config.user_id.clone()));

    let session = VoteAggregationSession::new(
        &args.poll_id,
        Arc::new(store),
        Arc::new(realtime),
        Arc::new(identity),
        Arc::new(local),
    )?;
    let mut updates = session.subscribe();

    session.initialize().await?;
    info!("Session key {}", session.presence_key());

    if !args.votes.is_empty() {
        match session.submit_vote(args.votes.clone()).await {
            Ok(()) => println!("Vote submitted"),
            Err(SessionError::AlreadyVoted) => println!("You've already voted"),
            Err(e) => error!("Vote failed: {}", e),
        }
    }

    render(&session.snapshot());
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                render(&snapshot);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.teardown();
    Ok(())
}
