//! Phase model: named ordinal-ordered states and the tracker that validates
//! transitions against an instance's declared phase set.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// A named state in an instance's finite state machine.
///
/// Phases are totally ordered by `ordinal`; the [`Phase::none`] sentinel has
/// ordinal -1 and precedes every real phase. Two phases are the same state
/// when their ids match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub ordinal: i32,
}

impl Phase {
    pub fn new(id: impl Into<String>, ordinal: i32) -> Self {
        Self {
            id: id.into(),
            ordinal,
        }
    }

    /// Universal initial sentinel. Not part of any declared phase set.
    pub fn none() -> Self {
        Self {
            id: "none".into(),
            ordinal: -1,
        }
    }

    pub fn is_none(&self) -> bool {
        self.ordinal < 0
    }

    pub fn is_before(&self, other: &Phase) -> bool {
        self.ordinal < other.ordinal
    }

    pub fn is_after(&self, other: &Phase) -> bool {
        self.ordinal > other.ordinal
    }

    pub fn is_at(&self, other: &Phase) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.id, self.ordinal)
    }
}

/// Tracks an instance's current phase against its declared phase set.
///
/// The tracker is the pure half of the phase state machine: it validates and
/// records transitions. Clearing phase-scoped listeners/tasks and running
/// end-of-phase callbacks is orchestrated by the instance that owns it.
#[derive(Clone, Debug)]
pub struct PhaseTracker {
    current: Phase,
    allowed: Vec<Phase>,
}

impl PhaseTracker {
    /// Creates a tracker starting at the `none` sentinel.
    pub fn new(allowed: Vec<Phase>) -> Self {
        Self {
            current: Phase::none(),
            allowed,
        }
    }

    pub fn current(&self) -> &Phase {
        &self.current
    }

    pub fn allowed(&self) -> &[Phase] {
        &self.allowed
    }

    /// Looks up a declared phase by id.
    pub fn find(&self, id: &str) -> Option<&Phase> {
        self.allowed.iter().find(|p| p.id == id)
    }

    pub fn is_allowed(&self, phase: &Phase) -> bool {
        self.allowed.iter().any(|p| p.id == phase.id)
    }

    /// Records a transition to `next`, returning the phase that was left.
    ///
    /// Fails with [`ConfigurationError::PhaseNotAllowed`] and leaves the
    /// current phase unchanged if `next` is outside the declared set. Moving
    /// to an earlier phase is permitted; there is no undo semantics, it is a
    /// transition like any other.
    pub fn transition(&mut self, next: Phase) -> Result<Phase, ConfigurationError> {
        if !self.is_allowed(&next) {
            return Err(ConfigurationError::PhaseNotAllowed {
                phase: next.id,
                allowed: self.allowed.iter().map(|p| p.id.clone()).collect(),
            });
        }
        Ok(std::mem::replace(&mut self.current, next))
    }
}
