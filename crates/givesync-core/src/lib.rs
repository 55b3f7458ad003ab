//! givesync-core - offline-first synchronization and caching engine.
//!
//! Keeps a giveaway client usable when connectivity is intermittent or
//! absent: durable ordered at-least-once replay of queued mutations,
//! per-resource caching policies, and best-effort fan-out of sync outcomes
//! to every open client view.
//!
//! The engine is wired explicitly through [`Engine::new`]: a
//! [`store::PersistentStore`] for durability, a [`net::Transport`] for the
//! wire, and an optional [`notify::PushSink`] for system notifications.
//! [`context::BackgroundContext`] owns the event loop reacting to
//! connectivity transitions and deferred sync registrations.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod monitor;
pub mod net;
pub mod notify;
pub mod store;
pub mod sync;

pub use config::EngineConfig;
pub use context::{BackgroundContext, ClientReply, ClientRequest, Engine};
pub use error::{CacheError, NetError, StoreError, SyncError};
pub use monitor::NetworkMonitor;
