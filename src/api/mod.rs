//! Query interface of the hosted backend.

use crate::error::BackendError;
use crate::models::poll::Poll;
use crate::models::vote::{NewVote, VoteRow};
use async_trait::async_trait;

pub mod rest;

pub use rest::RestStore;

/// Row access for polls and votes. Authorization and uniqueness are enforced
/// on the other side; implementations only report what the backend said.
#[async_trait]
pub trait PollStore: Send + Sync {
    /// `BackendError::NotFound` when no poll has this id.
    async fn fetch_poll_by_id(&self, id: &str) -> Result<Poll, BackendError>;

    async fn fetch_votes(&self, poll_id: &str) -> Result<Vec<VoteRow>, BackendError>;

    /// Whether a vote row exists for this poll and authenticated user.
    async fn has_voted(&self, poll_id: &str, user_id: &str) -> Result<bool, BackendError>;

    /// `BackendError::UniquenessViolation` when this voter already has a row.
    async fn insert_vote(&self, vote: &NewVote) -> Result<(), BackendError>;
}
