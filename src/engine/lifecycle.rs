// src/engine/lifecycle.rs

//! Pure lifecycle state machine of the interchange.
//!
//! ```text
//! Initialized -> Registering -> Running -> Quiescing -> Stopped
//!      |              |
//!      +--------------+------------------------------> Stopped
//! ```
//!
//! No IO happens here; the async shell in [`super::interchange`] asks the
//! machine whether a move is legal and records it.

use tracing::debug;

use crate::errors::{InterchangeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Initialized,
    Registering,
    Running,
    Quiescing,
    Stopped,
}

impl LifecycleState {
    /// Whether `self -> to` is a legal move.
    ///
    /// `Registering -> Registering` is allowed so a retried registration
    /// does not need special casing; it is recorded only once.
    pub fn can_advance(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Initialized, Registering)
                | (Initialized, Stopped)
                | (Registering, Registering)
                | (Registering, Running)
                | (Registering, Stopped)
                | (Running, Quiescing)
                | (Quiescing, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Stopped
    }
}

/// Current state plus every state visited so far, in order.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    history: Vec<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Initialized,
            history: vec![LifecycleState::Initialized],
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    pub fn advance(&mut self, to: LifecycleState) -> Result<()> {
        let from = self.state;
        if !from.can_advance(to) {
            return Err(InterchangeError::InvalidTransition { from, to });
        }
        if from != to {
            debug!(?from, ?to, "lifecycle transition");
            self.state = to;
            self.history.push(to);
        }
        Ok(())
    }
}
