//! ctfindex-storage: storage backends for trades, markets and sync state.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence, WAL)
//!
//! Both implement `TradeStore`, `MarketLookup` and `CheckpointStore` from
//! `ctfindex-core`.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
