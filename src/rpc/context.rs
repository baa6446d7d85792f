//! Per-call context and task identity.
//!
//! [`TaskId`] is the opaque identity a unit-of-work is keyed by.
//! [`CallContext`] is created by the interceptor for every call and
//! threaded explicitly through the handler into the session registry, so
//! the scope of any per-task state is auditable from the signature alone.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity of one logical call/task.
///
/// Wraps a UUID v4. Generated once per intercepted call and used as the
/// key in [`crate::db::ScopedSessions`]; the cleanup hook disposes the
/// session registered under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    /// Creates a new random `TaskId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call-local context handed to every handler.
///
/// Carries the task identity only; everything else a handler needs is
/// passed explicitly. Cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    task: TaskId,
}

impl CallContext {
    /// Creates a context with a fresh task identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            task: TaskId::new(),
        }
    }

    /// Returns the task identity of this call.
    #[must_use]
    pub const fn task(&self) -> TaskId {
        self.task
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
