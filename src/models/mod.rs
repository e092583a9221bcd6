pub mod events;
pub mod poll;
pub mod vote;
pub mod websocket;
