//! tileindex-storage — storage backends for the tile projection and checkpoint.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `postgres`: PostgreSQL via `sqlx` (feature `postgres`)
//!
//! Each backend implements both
//! [`ProjectionSink`](tileindex_core::sink::ProjectionSink) and
//! [`CheckpointStore`](tileindex_core::checkpoint::CheckpointStore).

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStorage;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStorage;
