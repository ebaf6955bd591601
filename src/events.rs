//! Event taxonomy and the immutable event envelope
//!
//! The payload set is a closed tagged union: the payload shape is fully
//! determined by the variant, and consumers match exhaustively, so an
//! unhandled kind is a compile error rather than a runtime surprise.

use crate::identifiers::{CorrelationId, EventId, MeetingId, ProjectId};
use crate::project::{MeetingRecordSummary, ProjectPhase};
use crate::store::ScheduleEntry;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Schema version stamped on every event
pub const EVENT_SCHEMA_VERSION: &str = "1.0.0";

/// Subscription key: one kind per payload variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum EventKind {
    /// A meeting completed
    MeetingCompleted,
    /// A phase change was requested
    PhaseChangeRequest,
    /// A project's phase changed
    PhaseChanged,
    /// A domain entity was patched
    EntityUpdated,
    /// A surfaced system error
    SystemError,
    /// Schedule entry created
    ScheduleCreated,
    /// Schedule entry updated
    ScheduleUpdated,
    /// Schedule entry deleted
    ScheduleDeleted,
    /// Bulk schedule reconciliation requested
    ScheduleSynced,
}

impl EventKind {
    /// All kinds, for exhaustive introspection
    pub const ALL: [EventKind; 9] = [
        EventKind::MeetingCompleted,
        EventKind::PhaseChangeRequest,
        EventKind::PhaseChanged,
        EventKind::EntityUpdated,
        EventKind::SystemError,
        EventKind::ScheduleCreated,
        EventKind::ScheduleUpdated,
        EventKind::ScheduleDeleted,
        EventKind::ScheduleSynced,
    ];

    /// Wire name. Schedule kinds keep the `schedule:` names that are the
    /// de facto contract with the schedule subsystem.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MeetingCompleted => "MeetingCompleted",
            EventKind::PhaseChangeRequest => "PhaseChangeRequest",
            EventKind::PhaseChanged => "PhaseChanged",
            EventKind::EntityUpdated => "EntityUpdated",
            EventKind::SystemError => "SystemError",
            EventKind::ScheduleCreated => "schedule:created",
            EventKind::ScheduleUpdated => "schedule:updated",
            EventKind::ScheduleDeleted => "schedule:deleted",
            EventKind::ScheduleSynced => "schedule:synced",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity attached to surfaced system errors
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational
    Low,
    /// Degraded but functioning
    Medium,
    /// Action needed
    High,
    /// Signal for external monitoring; still not a crash
    Critical,
}

/// CRUD action carried on schedule lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    /// Entry created
    Created,
    /// Entry updated
    Updated,
    /// Entry deleted
    Deleted,
    /// Bulk reconciliation requested
    Synced,
}

impl ScheduleAction {
    /// The event kind this action dispatches under
    pub fn kind(&self) -> EventKind {
        match self {
            ScheduleAction::Created => EventKind::ScheduleCreated,
            ScheduleAction::Updated => EventKind::ScheduleUpdated,
            ScheduleAction::Deleted => EventKind::ScheduleDeleted,
            ScheduleAction::Synced => EventKind::ScheduleSynced,
        }
    }
}

/// Metadata block of a schedule event, `projectId` plus free-form extras
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEventMetadata {
    /// Owning project of the schedule entry, when known
    pub project_id: Option<ProjectId>,
    /// Remaining metadata fields, preserved verbatim
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Schedule event payload; field names are the wire contract with the
/// schedule subsystem and must not change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEventPayload {
    /// What happened to the entry
    pub action: ScheduleAction,
    /// The entry itself
    pub schedule: ScheduleEntry,
    /// Which subsystem raised the event
    pub source: String,
    /// When the subsystem raised it
    pub timestamp: DateTime<Utc>,
    /// The raising subsystem's own event id, mirrored as a string
    pub event_id: String,
    /// Metadata block
    #[serde(default)]
    pub metadata: ScheduleEventMetadata,
}

/// Closed set of event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum EventPayload {
    /// A meeting completed
    MeetingCompleted {
        /// The completed meeting
        meeting_id: MeetingId,
        /// Its owning project
        project_id: ProjectId,
        /// Record summary used for classification
        meeting_record: MeetingRecordSummary,
        /// Who completed it
        completed_by: String,
        /// When it completed
        completed_at: DateTime<Utc>,
    },
    /// A phase change was requested
    PhaseChangeRequest {
        /// Target project
        project_id: ProjectId,
        /// Phase the requester observed
        current_phase: ProjectPhase,
        /// Requested phase
        target_phase: ProjectPhase,
        /// Mandatory human-readable reason
        reason: String,
        /// Requesting actor
        requested_by: String,
        /// Rule-driven vs. operator-initiated
        automatic: bool,
    },
    /// A project's phase changed
    PhaseChanged {
        /// The project that changed
        project_id: ProjectId,
        /// Phase before
        previous_phase: ProjectPhase,
        /// Phase after
        new_phase: ProjectPhase,
        /// Trigger reason
        reason: String,
        /// Acting party
        changed_by: String,
        /// When the change was applied
        changed_at: DateTime<Utc>,
        /// Rule-driven vs. operator-initiated
        automatic: bool,
    },
    /// A domain entity was patched
    EntityUpdated {
        /// The patched entity
        entity_id: String,
        /// The patch applied
        patch: serde_json::Value,
        /// Names of the fields that changed
        updated_fields: Vec<String>,
        /// Acting party
        updated_by: String,
        /// When the patch was applied
        updated_at: DateTime<Utc>,
    },
    /// A surfaced system error
    SystemError {
        /// Error message
        error: String,
        /// Where it happened
        context: String,
        /// How bad it is
        severity: ErrorSeverity,
        /// Affected user, when known
        user_id: Option<String>,
        /// Affected session, when known
        session_id: Option<String>,
    },
    /// A schedule lifecycle event carried over the same bus
    Schedule(ScheduleEventPayload),
}

impl EventPayload {
    /// The kind this payload dispatches under
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::MeetingCompleted { .. } => EventKind::MeetingCompleted,
            EventPayload::PhaseChangeRequest { .. } => EventKind::PhaseChangeRequest,
            EventPayload::PhaseChanged { .. } => EventKind::PhaseChanged,
            EventPayload::EntityUpdated { .. } => EventKind::EntityUpdated,
            EventPayload::SystemError { .. } => EventKind::SystemError,
            EventPayload::Schedule(p) => p.action.kind(),
        }
    }
}

/// Options accepted by the event factory
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    /// Originating source label; defaults to `"core"`
    pub source: Option<String>,
    /// Correlation id linking this event into a causal chain
    pub correlation_id: Option<CorrelationId>,
}

/// Immutable event envelope; created by the factory, never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    /// Unique event id, the idempotency guard key
    pub id: EventId,
    /// Payload, shape determined by the kind
    pub payload: EventPayload,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Originating source label
    pub source: String,
    /// Envelope schema version
    pub schema_version: String,
    /// Correlation id linking a causal chain, when part of one
    pub correlation_id: Option<CorrelationId>,
}

impl Event {
    /// Factory: stamp a fresh id, current timestamp, and schema version
    pub fn new(payload: EventPayload, options: EventOptions) -> Self {
        Self {
            id: EventId::new(),
            payload,
            timestamp: Utc::now(),
            source: options.source.unwrap_or_else(|| "core".to_string()),
            schema_version: EVENT_SCHEMA_VERSION.to_string(),
            correlation_id: options.correlation_id,
        }
    }

    /// Factory shorthand with default options
    pub fn of(payload: EventPayload) -> Self {
        Self::new(payload, EventOptions::default())
    }

    /// Derived-event factory: carries the parent's correlation id, or starts
    /// the chain at the parent's own id
    pub fn caused_by(payload: EventPayload, parent: &Event) -> Self {
        Self::new(
            payload,
            EventOptions {
                source: Some(parent.source.clone()),
                correlation_id: Some(
                    parent
                        .correlation_id
                        .unwrap_or_else(|| CorrelationId::from(parent.id)),
                ),
            },
        )
    }

    /// Schedule event factory; the payload's `eventId` mirrors the envelope id
    pub fn schedule(
        action: ScheduleAction,
        schedule: ScheduleEntry,
        source: impl Into<String>,
    ) -> Self {
        let id = EventId::new();
        let now = Utc::now();
        let source = source.into();
        let project_id = schedule.project_id;
        Self {
            id,
            payload: EventPayload::Schedule(ScheduleEventPayload {
                action,
                schedule,
                source: source.clone(),
                timestamp: now,
                event_id: id.to_string(),
                metadata: ScheduleEventMetadata {
                    project_id,
                    extra: HashMap::new(),
                },
            }),
            timestamp: now,
            source,
            schema_version: EVENT_SCHEMA_VERSION.to_string(),
            correlation_id: None,
        }
    }

    /// The kind this event dispatches under
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
