//! # phaseflow
//!
//! Event-driven core for a project-lifecycle platform: a typed
//! publish/subscribe bus, the phase transition state machine it drives, and
//! the orchestrator that keeps the schedule and project stores in agreement.
//!
//! The building blocks:
//! - **Event Bus**: priority-ordered, settle-all dispatch with a middleware
//!   pipeline, per-event metrics, and graceful shutdown
//! - **Event Taxonomy**: a closed tagged union of domain events, matched
//!   exhaustively
//! - **Idempotency Guard**: per-event-id echo detection for multi-store
//!   synchronization
//! - **Phase Engine**: the project lifecycle state machine, its transition
//!   triggers, and its durable audit trail
//! - **Sync Orchestrator**: schedule↔project reconciliation, incremental and
//!   bulk
//!
//! ## Design principles
//!
//! 1. **No singletons**: the bus and every collaborator are constructed at
//!    the composition root and injected by `Arc`
//! 2. **Closed unions**: payload shape is determined by the event kind at
//!    compile time
//! 3. **Containment**: a failing handler, middleware, or sync item never
//!    takes down its siblings
//! 4. **Benign duplicates**: re-delivered events and re-requested
//!    transitions are logged no-ops, not errors
//!
//! ## Wiring example
//!
//! ```rust
//! use std::sync::Arc;
//! use phaseflow::{
//!     EventBus, InMemoryProjectStore, InMemoryScheduleStore, PhaseEngine, SyncOrchestrator,
//! };
//!
//! # tokio_test::block_on(async {
//! let bus = Arc::new(EventBus::new());
//! let projects = Arc::new(InMemoryProjectStore::new());
//! let schedules = Arc::new(InMemoryScheduleStore::new());
//!
//! let engine = Arc::new(PhaseEngine::new(projects.clone(), bus.clone()));
//! engine.register().await.unwrap();
//!
//! let orchestrator = Arc::new(SyncOrchestrator::new(
//!     bus.clone(),
//!     projects,
//!     schedules,
//!     engine,
//! ));
//! orchestrator.register().await.unwrap();
//! orchestrator.perform_initial_sync().await.unwrap();
//! # });
//! ```

#![warn(missing_docs)]

mod bus;
mod convert;
mod errors;
mod events;
mod guard;
mod identifiers;
mod orchestrator;
mod phase_engine;
mod project;
mod state_machine;
mod store;

pub use bus::{
    handler_fn, BusConfig, BusMetrics, ErrorHandlerFn, EventBus, EventHandler, EventMiddleware,
    HandlerErrorContext, ListenerInfo, ProcessingRecord, ProcessingStatus, SubscribeOptions,
};
pub use convert::{meeting_to_schedule, schedule_to_meeting, PROJECT_SYNC_SOURCE};
pub use errors::{CoreError, CoreResult};
pub use events::{
    ErrorSeverity, Event, EventKind, EventOptions, EventPayload, ScheduleAction,
    ScheduleEventMetadata, ScheduleEventPayload, EVENT_SCHEMA_VERSION,
};
pub use guard::IdempotencyGuard;
pub use identifiers::{
    CorrelationId, EventId, MeetingId, ProjectId, ScheduleId, SubscriptionId,
};
pub use orchestrator::{SyncOrchestrator, SyncReport};
pub use phase_engine::{PaymentData, PhaseEngine, PhaseTransitionRecord, TransitionStatus};
pub use project::{
    Meeting, MeetingRecordSummary, MeetingSequence, MeetingStatus, PhaseHistoryEntry, Project,
    ProjectPhase,
};
pub use state_machine::{State, StateTransitions};
pub use store::{
    InMemoryProjectStore, InMemoryScheduleStore, PhaseUpdateFn, PhaseUpdateOutcome, ProjectStore,
    ScheduleEntry, ScheduleStore,
};
