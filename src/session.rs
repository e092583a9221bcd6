//! Live view of one poll: tally, viewer count and vote eligibility.
//!
//! Every insert notification triggers a full re-read of the poll's votes
//! rather than an incremental merge, so duplicated or reordered notifications
//! converge on the same tally. Results that complete after `teardown` are
//! dropped without touching the published state.

use crate::api::PollStore;
use crate::error::SessionError;
use crate::identity::{resolve_voter, IdentityResolver};
use crate::models::events::ChannelEvent;
use crate::models::poll::Poll;
use crate::models::vote::NewVote;
use crate::storage::{voted_marker_key, KeyValueStore};
use crate::tally::{OptionResult, Tally};
use crate::websocket::{RealtimeChannel, Subscription};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// The reactive fields exposed to a UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub poll: Option<Poll>,
    pub tally: Tally,
    pub total_votes: u64,
    pub active_viewers: usize,
    pub has_voted: bool,
    pub loading: bool,
    pub error: Option<SessionError>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            poll: None,
            tally: Tally::default(),
            total_votes: 0,
            // The viewer itself, until the first presence sync.
            active_viewers: 1,
            has_voted: false,
            loading: true,
            error: None,
        }
    }
}

impl SessionSnapshot {
    pub fn rows(&self) -> Vec<OptionResult> {
        self.poll
            .as_ref()
            .map(|poll| self.tally.rows(poll))
            .unwrap_or_default()
    }

    pub fn is_ended(&self, now: DateTime<Utc>) -> bool {
        self.poll.as_ref().is_some_and(|poll| poll.is_ended_at(now))
    }

    pub fn results_visible(&self, now: DateTime<Utc>) -> bool {
        self.poll
            .as_ref()
            .is_some_and(|poll| poll.results_visible(self.has_voted, now))
    }
}

#[derive(Default)]
struct State {
    /// An `initialize` call is running or has finished.
    initialized: bool,
    /// Both subscriptions are open and the pump is running.
    ready: bool,
    closed: bool,
    /// A subscription gave up reconnecting; refreshes no longer clear the error.
    channel_lost: bool,
    snapshot: SessionSnapshot,
    subscriptions: Vec<Box<dyn Subscription>>,
    pump: Option<JoinHandle<()>>,
}

struct Shared {
    poll_id: String,
    presence_key: String,
    store: Arc<dyn PollStore>,
    realtime: Arc<dyn RealtimeChannel>,
    identity: Arc<dyn IdentityResolver>,
    local: Arc<dyn KeyValueStore>,
    state: Mutex<State>,
    updates: watch::Sender<SessionSnapshot>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Applies `change` and notifies observers. Returns false once torn down.
    fn update_state(&self, change: impl FnOnce(&mut State)) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        change(&mut state);
        self.updates.send_replace(state.snapshot.clone());
        true
    }

    fn update(&self, change: impl FnOnce(&mut SessionSnapshot)) -> bool {
        self.update_state(|state| change(&mut state.snapshot))
    }

    async fn refresh_tally(&self) -> Result<(), SessionError> {
        let rows = self.store.fetch_votes(&self.poll_id).await?;
        let tally = Tally::from_rows(&rows);
        let applied = self.update_state(|state| {
            state.snapshot.total_votes = tally.total_votes();
            state.snapshot.tally = tally;
            let recoverable = state
                .snapshot
                .error
                .as_ref()
                .is_some_and(|e| !e.is_terminal());
            if recoverable && !state.channel_lost {
                state.snapshot.error = None;
            }
        });
        if !applied {
            debug!("Discarding tally for closed session {}", self.poll_id);
        }
        Ok(())
    }
}

async fn pump_events(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(first) = events.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = events.try_recv() {
            batch.push(next);
        }

        let mut refresh = false;
        for event in batch {
            match event {
                ChannelEvent::VoteInserted | ChannelEvent::Reconnected => refresh = true,
                ChannelEvent::PresenceSync(keys) => {
                    let viewers = keys.iter().collect::<HashSet<_>>().len();
                    shared.update(|s| s.active_viewers = viewers);
                }
                ChannelEvent::Lost(reason) => {
                    error!("Realtime updates for poll {} stopped: {}", shared.poll_id, reason);
                    shared.update_state(|state| {
                        state.channel_lost = true;
                        state.snapshot.error = Some(SessionError::Transient(format!(
                            "realtime channel lost: {}",
                            reason
                        )));
                    });
                }
            }
        }

        if shared.is_closed() {
            return;
        }
        if refresh {
            if let Err(e) = shared.refresh_tally().await {
                warn!("Failed to refresh votes for poll {}: {}", shared.poll_id, e);
                shared.update(|s| s.error = Some(e));
            }
        }
    }
    debug!("Event stream for poll {} ended", shared.poll_id);
}

fn closed_error() -> SessionError {
    SessionError::Validation("session is closed".to_owned())
}

/// Checks a selection against the poll before anything goes over the network.
pub fn validate_selection(
    poll: &Poll,
    selected: Vec<String>,
    now: DateTime<Utc>,
) -> Result<Vec<String>, SessionError> {
    if poll.is_ended_at(now) {
        return Err(SessionError::Validation("voting has ended".to_owned()));
    }
    if selected.is_empty() {
        return Err(SessionError::Validation(
            "select at least one option".to_owned(),
        ));
    }
    if !poll.settings.allow_multiple && selected.len() > 1 {
        return Err(SessionError::Validation(
            "this poll accepts a single option".to_owned(),
        ));
    }

    let mut seen = HashSet::with_capacity(selected.len());
    for option in &selected {
        if !poll.options.contains(option) {
            return Err(SessionError::Validation(format!(
                "{:?} is not an option of this poll",
                option
            )));
        }
        if !seen.insert(option.as_str()) {
            return Err(SessionError::Validation(format!(
                "{:?} selected more than once",
                option
            )));
        }
    }
    Ok(selected)
}

/// Watches a single poll until torn down. Dropping the session tears it down.
pub struct VoteAggregationSession {
    shared: Arc<Shared>,
}

impl VoteAggregationSession {
    pub fn new(
        poll_id: &str,
        store: Arc<dyn PollStore>,
        realtime: Arc<dyn RealtimeChannel>,
        identity: Arc<dyn IdentityResolver>,
        local: Arc<dyn KeyValueStore>,
    ) -> Result<Self, SessionError> {
        let poll_id = poll_id.trim();
        if poll_id.is_empty() {
            return Err(SessionError::Validation("poll id is empty".to_owned()));
        }

        let presence_key = identity
            .current_user()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (updates, _) = watch::channel(SessionSnapshot::default());

        Ok(Self {
            shared: Arc::new(Shared {
                poll_id: poll_id.to_owned(),
                presence_key,
                store,
                realtime,
                identity,
                local,
                state: Mutex::new(State::default()),
                updates,
            }),
        })
    }

    pub fn poll_id(&self) -> &str {
        &self.shared.poll_id
    }

    /// Key this session is tracked under on the presence channel.
    pub fn presence_key(&self) -> &str {
        &self.shared.presence_key
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.lock().snapshot.clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.updates.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Records an `initialize` failure. Non-terminal failures reset the session
    /// so the caller may call `initialize` again.
    fn fail(&self, err: SessionError) -> Result<(), SessionError> {
        let terminal = err.is_terminal();
        let applied = self.shared.update_state(|state| {
            state.initialized = terminal;
            let s = &mut state.snapshot;
            s.loading = false;
            s.error = Some(err.clone());
            if !terminal {
                s.poll = None;
                s.tally = Tally::default();
                s.total_votes = 0;
                s.has_voted = false;
            }
        });
        if !applied {
            return Ok(());
        }
        if err.is_terminal() {
            warn!("Session for poll {} ended: {}", self.shared.poll_id, err);
        } else {
            error!("Failed to load poll {}: {}", self.shared.poll_id, err);
        }
        Err(err)
    }

    pub async fn initialize(&self) -> Result<(), SessionError> {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if state.closed {
                return Err(closed_error());
            }
            if let Some(err) = state.snapshot.error.as_ref().filter(|e| e.is_terminal()) {
                return Err(err.clone());
            }
            if state.initialized {
                return Err(SessionError::Validation(
                    "session already initialized".to_owned(),
                ));
            }
            state.initialized = true;
            state.snapshot.loading = true;
            state.snapshot.error = None;
            shared.updates.send_replace(state.snapshot.clone());
        }

        let poll = match shared.store.fetch_poll_by_id(&shared.poll_id).await {
            Ok(poll) => poll,
            Err(e) => return self.fail(e.into()),
        };
        if poll.id != shared.poll_id {
            return self.fail(SessionError::Malformed(format!(
                "asked for poll {}, got {}",
                shared.poll_id, poll.id
            )));
        }
        if let Err(reason) = poll.validate() {
            return self.fail(SessionError::Malformed(reason));
        }
        if !shared.update(|s| s.poll = Some(poll)) {
            return Ok(());
        }

        if let Err(e) = shared.refresh_tally().await {
            return self.fail(e);
        }

        let has_voted = match shared.identity.current_user() {
            Some(user_id) => match shared.store.has_voted(&shared.poll_id, &user_id).await {
                Ok(voted) => voted,
                Err(e) => return self.fail(e.into()),
            },
            None => shared.local.get(&voted_marker_key(&shared.poll_id)).is_some(),
        };
        if !shared.update(|s| s.has_voted = s.has_voted || has_voted) {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut inserts = match shared
            .realtime
            .subscribe_inserts(&shared.poll_id, tx.clone())
            .await
        {
            Ok(sub) => sub,
            Err(e) => return self.fail(e.into()),
        };
        let presence = match shared
            .realtime
            .subscribe_presence(&shared.poll_id, &shared.presence_key, tx)
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                inserts.close();
                return self.fail(e.into());
            }
        };

        let mut state = shared.state.lock();
        let mut subscriptions = vec![inserts, presence];
        if state.closed {
            for sub in &mut subscriptions {
                sub.close();
            }
            return Ok(());
        }
        state.subscriptions = subscriptions;
        state.pump = Some(tokio::spawn(pump_events(Arc::clone(shared), rx)));
        state.ready = true;
        state.snapshot.loading = false;
        shared.updates.send_replace(state.snapshot.clone());
        info!("Watching poll {}", shared.poll_id);
        Ok(())
    }

    /// Casts a vote. The tally is left to the insert notification.
    pub async fn submit_vote(&self, selected: Vec<String>) -> Result<(), SessionError> {
        let shared = &self.shared;
        let poll = {
            let state = shared.state.lock();
            if state.closed {
                return Err(closed_error());
            }
            match (&state.snapshot.poll, state.ready) {
                (Some(poll), true) => poll.clone(),
                _ => {
                    return Err(SessionError::Validation(
                        "session is not initialized".to_owned(),
                    ))
                }
            }
        };
        let selected = validate_selection(&poll, selected, Utc::now())?;

        let voter = resolve_voter(&*shared.identity, &*shared.local)
            .map_err(|e| SessionError::Transient(format!("local store: {}", e)))?;
        let vote = NewVote::new(&poll.id, selected, &voter);

        shared.store.insert_vote(&vote).await?;

        if voter.is_anonymous() {
            if let Err(e) = shared.local.set(&voted_marker_key(&poll.id), "true") {
                warn!("Failed to remember vote on poll {}: {}", poll.id, e);
            }
        }
        shared.update(|s| s.has_voted = true);
        Ok(())
    }

    /// Closes both subscriptions. Safe to call more than once.
    pub fn teardown(&self) {
        let (subscriptions, pump) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (std::mem::take(&mut state.subscriptions), state.pump.take())
        };

        for mut sub in subscriptions {
            sub.close();
        }
        if let Some(pump) = pump {
            pump.abort();
        }
        info!("Stopped watching poll {}", self.shared.poll_id);
    }
}

impl Drop for VoteAggregationSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
