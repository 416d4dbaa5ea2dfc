//! qmon - queue state synchronization for remote download services
//!
//! Polls a download service for its queue, status and history, keeps the
//! last good snapshot of each, renders them into paginated display rows and
//! issues control commands whose effects show up on the next poll.

pub mod dispatcher;
pub mod display;
pub mod engine;
pub mod error;
pub mod events;
pub mod formatting;
pub mod models;
pub mod poller;
pub mod preferences;
pub mod render;
pub mod store;
pub mod transport;

pub use engine::{Engine, EngineOptions};
