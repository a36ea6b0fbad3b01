//! Entity state persistence
//!
//! Decides which networked entities need their state saved to (or removed from) the remote store,
//! rate limits the saves per entity and splits hierarchies into independently storable records.

pub mod backlog;
pub mod config;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod load;
pub mod logger;
pub mod message;
pub mod net;
pub mod ownership;
pub mod payload;
pub mod persistence;
pub mod scheduler;
pub mod store;
pub mod time;
pub mod world;

pub use config::Config;
pub use error::Error;
pub use persistence::Persistence;
