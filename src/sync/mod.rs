//! Sync
//!
//! Moves submitted records from local-only to remote-acknowledged state.
//! ```text
//! pending → syncing → synced
//!              ↓
//!           pending (attempts + 1, backoff)   |   failed (permanent rejection)
//! ```
//! The background worker drives the reconciler from a timer and from the
//! connectivity signal.

pub mod error;
pub mod traits;
pub mod backoff;
pub mod reconciler;
pub mod http;
pub mod background;

pub use error::SyncError;
pub use traits::SyncEndpoint;
pub use backoff::BackoffPolicy;
pub use reconciler::{PassReport, Reconciler};
pub use http::HttpSyncEndpoint;
pub use background::{start_sync_worker, SyncWorkerHandle};
