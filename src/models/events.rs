/// Notification delivered from a realtime subscription to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A vote row was inserted for the watched poll.
    VoteInserted,
    /// Current presence membership, as distinct connection keys.
    PresenceSync(Vec<String>),
    /// The channel came back after a dropped connection; inserts may have been missed.
    Reconnected,
    /// The channel stopped reconnecting; no further events will arrive from it.
    Lost(String),
}
