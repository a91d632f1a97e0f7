//! tileindex-core — resumable, idempotent ingestion of tilemap contract events.
//!
//! # Architecture
//!
//! ```text
//! Supervisor ──start(from)──► LogTransport (ws / poll)
//!     │                            │ TransportEvent::{Connected, Logs, Error, Closed}
//!     │◄───────────────────────────┘
//!     ├── Dispatcher (direct | queued)
//!     │       ├── EventDecoder      (RawLog → DomainEvent)
//!     │       ├── WorkQueue         (bounded, retrying, dead letters)
//!     │       └── ProjectionSink    (idempotent upsert keyed by (x, y))
//!     ├── Watermark → CheckpointManager → CheckpointStore
//!     └── Backoff (reconnects)
//! ```

pub mod backoff;
pub mod checkpoint;
pub mod cursor;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod indexer;
pub mod queue;
pub mod sink;
pub mod supervisor;
pub mod transport;
pub mod types;
pub mod watermark;

pub use backoff::Backoff;
pub use checkpoint::{CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use cursor::Cursor;
pub use decoder::EventDecoder;
pub use dispatcher::{build_dispatcher, DirectDispatcher, DispatchReport, Dispatcher, QueuedDispatcher};
pub use error::IndexerError;
pub use event::{DomainEvent, EventKind, EventMeta, TileRow};
pub use indexer::{DispatchMode, IndexerConfig, IndexerState, StartPolicy};
pub use queue::{QueueConfig, WorkQueue};
pub use sink::ProjectionSink;
pub use supervisor::{Supervisor, SupervisorEvent};
pub use transport::{LogTransport, SessionHandle, TransportEvent, TransportSession};
pub use types::{BlockSelector, EventFilter, LogBatch, RawLog};
pub use watermark::Watermark;
