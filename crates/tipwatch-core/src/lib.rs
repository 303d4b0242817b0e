//! tipwatch-core: cursor model and the reorg-safe catch-up algorithm.
//!
//! # Architecture
//!
//! ```text
//! run_loop(Reconciler) ── HeadTracker      (source of truth: RPC provider)
//!                     └── DonationIndexer  (source of truth: ConfirmedHeads)
//!                              │
//!                              ├── CatchUp::plan  (verify cursor, pick window)
//!                              └── Storage backend (memory / SQLite / Postgres)
//! ```

pub mod backoff;
pub mod config;
pub mod cursor;
pub mod error;
pub mod reorg;
pub mod runner;
pub mod store;
pub mod tracker;
pub mod types;

pub use backoff::{Backoff, BackoffConfig};
pub use config::IndexerConfig;
pub use cursor::{CursorEntry, CursorTable};
pub use error::IndexerError;
pub use reorg::{CatchUp, CatchUpWindow, Divergence, HashSource, Plan};
pub use runner::{run_loop, LoopStats, PassOutcome, PollOptions, Reconciler};
pub use store::{CursorStore, DonationStore};
pub use tracker::ConfirmedHeads;
pub use types::{BlockHeader, DonationRecord};
