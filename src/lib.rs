pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod presence;
pub mod session;
pub mod storage;
pub mod tally;
pub mod websocket;

pub use error::{BackendError, SessionError};
pub use session::{SessionSnapshot, VoteAggregationSession};
