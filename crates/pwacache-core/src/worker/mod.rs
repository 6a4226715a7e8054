//! Worker lifecycle.
//!
//! This module provides:
//! - `WorkerEvent` / `EventOutcome`: the dispatch table routing each event
//!   kind to its `CacheManager` handler
//! - `Registration`: the installing / waiting / active worker versions for a
//!   scope, and the clients they control

pub mod event;
pub mod registration;

pub use event::{EventOutcome, WorkerEvent};
pub use registration::{ClientId, Registration, WorkerId, WorkerState};
