// src/engine/mod.rs

//! Orchestration engine for the interchange.
//!
//! This module ties together:
//! - registration with the control service
//! - the broker channels (task intake, result publication)
//! - the executor registry (dispatch, result collection)
//! - the main loop that reacts to:
//!   - tasks arriving from the broker
//!   - results arriving from executors
//!   - channel failures (reconnect path)
//!   - shutdown requests
//!
//! The pure lifecycle state machine lives in [`lifecycle`]; the async/IO
//! shell is implemented in [`interchange`].

pub mod interchange;
pub mod lifecycle;

pub use interchange::{Interchange, InterchangeSettings, QuiesceReport, ShutdownHandle};
pub use lifecycle::{Lifecycle, LifecycleState};
