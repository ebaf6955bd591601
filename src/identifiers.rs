//! Identifier types for events, subscriptions, and domain aggregates
//!
//! Ids are globally unique UUIDs behind newtypes so they cannot be mixed up
//! at compile time. Event ids in particular must never collide: the
//! idempotency guard treats a repeated id as an echo and suppresses it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
        )]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from a UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Get the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Unique id stamped on every bus event at creation time
    EventId
}

uuid_id! {
    /// Id of one listener registration, returned by `subscribe`
    SubscriptionId
}

uuid_id! {
    /// Project aggregate id
    ProjectId
}

uuid_id! {
    /// Meeting id, unique within and across projects
    MeetingId
}

uuid_id! {
    /// Schedule/calendar entry id
    ScheduleId
}

/// Correlation id linking a causally-related chain of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Create a fresh correlation id for the root of a new causal chain
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<EventId> for CorrelationId {
    fn from(id: EventId) -> Self {
        Self(id.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "correlation:{}", self.0)
    }
}
