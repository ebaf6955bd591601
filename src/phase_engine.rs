//! Phase transition engine
//!
//! Governs a project's lifecycle phase. Three triggers, in priority order of
//! specificity: the meeting-sequence rule, payment completion, and explicit
//! manual requests. Every applied transition appends exactly one history
//! entry, updates the phase in the same critical section, records a durable
//! audit entry, and publishes exactly one `PhaseChanged` event.
//!
//! Duplicate or stale requests are benign no-ops, not errors; they are
//! expected under normal duplicate-event conditions and only logged.

use crate::bus::{handler_fn, EventBus, SubscribeOptions};
use crate::errors::{CoreError, CoreResult};
use crate::events::{Event, EventKind, EventOptions, EventPayload};
use crate::guard::IdempotencyGuard;
use crate::identifiers::{CorrelationId, ProjectId};
use crate::project::{MeetingRecordSummary, ProjectPhase};
use crate::state_machine::StateTransitions;
use crate::store::{PhaseUpdateOutcome, ProjectStore};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Outcome recorded on an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    /// The transition was applied
    Completed,
    /// The request was a benign no-op (duplicate, stale, or invalid target)
    Skipped,
}

/// Durable audit record: the system of record for "why did this project
/// change phase", independent of the transient bus events that caused it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PhaseTransitionRecord {
    /// The project concerned
    pub project_id: ProjectId,
    /// Phase before (as observed when the request was processed)
    pub from: ProjectPhase,
    /// Requested target phase
    pub to: ProjectPhase,
    /// Trigger description
    pub trigger: String,
    /// Requesting actor
    pub requested_by: String,
    /// When the request was processed
    pub timestamp: DateTime<Utc>,
    /// Rule-driven vs. operator-initiated
    pub automatic: bool,
    /// Applied or skipped
    pub status: TransitionStatus,
}

/// External payment-confirmed signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PaymentData {
    /// Payment reference from the payment provider
    pub payment_id: String,
    /// Amount paid, when reported
    pub amount: Option<f64>,
    /// When the payment completed
    pub paid_at: DateTime<Utc>,
}

/// The domain state machine governing project lifecycle phases
pub struct PhaseEngine {
    projects: Arc<dyn ProjectStore>,
    bus: Arc<EventBus>,
    guard: IdempotencyGuard,
    audit: RwLock<Vec<PhaseTransitionRecord>>,
}

impl PhaseEngine {
    /// Build an engine over a project store and a shared bus
    pub fn new(projects: Arc<dyn ProjectStore>, bus: Arc<EventBus>) -> Self {
        Self {
            projects,
            bus,
            guard: IdempotencyGuard::new(),
            audit: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe the engine to the bus events that drive it
    pub async fn register(self: &Arc<Self>) -> CoreResult<()> {
        let engine = Arc::clone(self);
        self.bus
            .subscribe(
                EventKind::MeetingCompleted,
                handler_fn(move |event| {
                    let engine = Arc::clone(&engine);
                    Box::pin(async move { engine.on_meeting_completed(event).await })
                }),
                SubscribeOptions::priority(10),
            )
            .await?;

        let engine = Arc::clone(self);
        self.bus
            .subscribe(
                EventKind::PhaseChangeRequest,
                handler_fn(move |event| {
                    let engine = Arc::clone(&engine);
                    Box::pin(async move { engine.on_phase_change_request(event).await })
                }),
                SubscribeOptions::priority(10),
            )
            .await?;
        Ok(())
    }

    async fn on_meeting_completed(&self, event: Event) -> CoreResult<()> {
        if !self.guard.should_process(&event.id) {
            debug!(event_id = %event.id, "duplicate MeetingCompleted suppressed");
            return Ok(());
        }
        let EventPayload::MeetingCompleted {
            project_id,
            meeting_record,
            completed_by,
            ..
        } = &event.payload
        else {
            warn!(kind = %event.kind(), "unexpected payload on MeetingCompleted subscription");
            return Ok(());
        };
        self.absorb_recoverable(
            self.trigger_from_meeting_caused_by(
                *project_id,
                meeting_record,
                completed_by.as_str(),
                Some(&event),
            )
            .await
            .map(|_| ()),
        )
    }

    async fn on_phase_change_request(&self, event: Event) -> CoreResult<()> {
        if !self.guard.should_process(&event.id) {
            debug!(event_id = %event.id, "duplicate PhaseChangeRequest suppressed");
            return Ok(());
        }
        let EventPayload::PhaseChangeRequest {
            project_id,
            current_phase,
            target_phase,
            reason,
            requested_by,
            automatic,
        } = &event.payload
        else {
            warn!(kind = %event.kind(), "unexpected payload on PhaseChangeRequest subscription");
            return Ok(());
        };
        self.absorb_recoverable(
            self.apply(
                *project_id,
                Some(*current_phase),
                *target_phase,
                reason.clone(),
                requested_by.clone(),
                *automatic,
                Some(&event),
            )
            .await
            .map(|_| ()),
        )
    }

    // A missing project is logged and the event dropped; the next full
    // reconciliation pass corrects it.
    fn absorb_recoverable(&self, result: CoreResult<()>) -> CoreResult<()> {
        match result {
            Err(err) if err.is_recoverable_sync_error() => {
                warn!(%err, "phase trigger dropped");
                Ok(())
            }
            other => other,
        }
    }

    /// Manual, explicitly-reasoned operator transition. Skips silently when
    /// the observed phase no longer matches `from`; no-op when `to` equals
    /// the current phase.
    pub async fn request_manual_transition(
        &self,
        project_id: ProjectId,
        from: ProjectPhase,
        to: ProjectPhase,
        requested_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> CoreResult<PhaseUpdateOutcome> {
        self.apply(
            project_id,
            Some(from),
            to,
            reason.into(),
            requested_by.into(),
            false,
            None,
        )
        .await
    }

    /// Meeting-sequence rule. An unresolvable classifier suppresses the
    /// automatic transition without error.
    pub async fn trigger_from_meeting(
        &self,
        project_id: ProjectId,
        record: &MeetingRecordSummary,
        actor: impl Into<String>,
    ) -> CoreResult<Option<PhaseUpdateOutcome>> {
        self.trigger_from_meeting_caused_by(project_id, record, actor, None)
            .await
    }

    /// Meeting-sequence rule with the causing bus event, for correlation
    pub async fn trigger_from_meeting_caused_by(
        &self,
        project_id: ProjectId,
        record: &MeetingRecordSummary,
        actor: impl Into<String>,
        cause: Option<&Event>,
    ) -> CoreResult<Option<PhaseUpdateOutcome>> {
        let Some(sequence) = record.resolved_sequence() else {
            debug!(
                project = %project_id,
                title = %record.title,
                "meeting sequence unresolved, automatic transition suppressed"
            );
            return Ok(None);
        };
        let outcome = self
            .apply(
                project_id,
                None,
                sequence.target_phase(),
                format!("meeting {sequence} completed"),
                actor.into(),
                true,
                cause,
            )
            .await?;
        Ok(Some(outcome))
    }

    /// Payment-confirmed signal: marks the project ready to begin
    pub async fn handle_payment_completed(
        &self,
        project_id: ProjectId,
        payment: PaymentData,
    ) -> CoreResult<PhaseUpdateOutcome> {
        self.apply(
            project_id,
            None,
            ProjectPhase::ContractSigned,
            format!("payment {} completed", payment.payment_id),
            "payment-system".to_string(),
            true,
            None,
        )
        .await
    }

    /// Audit trail, optionally filtered to one project
    pub async fn transition_history(
        &self,
        project_id: Option<&ProjectId>,
    ) -> Vec<PhaseTransitionRecord> {
        let audit = self.audit.read().expect("audit lock poisoned");
        match project_id {
            Some(id) => audit.iter().filter(|r| &r.project_id == id).cloned().collect(),
            None => audit.clone(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        project_id: ProjectId,
        expectation: Option<ProjectPhase>,
        target: ProjectPhase,
        reason: String,
        actor: String,
        automatic: bool,
        cause: Option<&Event>,
    ) -> CoreResult<PhaseUpdateOutcome> {
        let closure_reason = reason.clone();
        let closure_actor = actor.clone();
        let outcome = self
            .projects
            .update_phase(
                &project_id,
                Box::new(move |project| {
                    if let Some(expected) = expectation {
                        if project.phase != expected {
                            return PhaseUpdateOutcome::SkippedStale {
                                expected,
                                observed: project.phase,
                            };
                        }
                    }
                    if project.phase == target {
                        return PhaseUpdateOutcome::SkippedSame { current: target };
                    }
                    // The rule engine only moves forward; the manual path is
                    // privileged and may jump anywhere but the current phase.
                    if automatic && !project.phase.can_transition_to(&target) {
                        return PhaseUpdateOutcome::SkippedInvalid {
                            from: project.phase,
                            to: target,
                        };
                    }
                    let previous = project.phase;
                    project.apply_phase_change(target, closure_reason, closure_actor, automatic);
                    PhaseUpdateOutcome::Applied {
                        previous,
                        new: target,
                    }
                }),
            )
            .await?;

        match &outcome {
            PhaseUpdateOutcome::Applied { previous, new } => {
                self.record_audit(
                    project_id, *previous, *new, &reason, &actor, automatic,
                    TransitionStatus::Completed,
                );
                let changed_at = Utc::now();
                let payload = EventPayload::PhaseChanged {
                    project_id,
                    previous_phase: *previous,
                    new_phase: *new,
                    reason: reason.clone(),
                    changed_by: actor.clone(),
                    changed_at,
                    automatic,
                };
                let event = match cause {
                    Some(parent) => Event::caused_by(payload, parent),
                    None => Event::new(
                        payload,
                        EventOptions {
                            source: Some("phase-engine".to_string()),
                            correlation_id: Some(CorrelationId::new()),
                        },
                    ),
                };
                if let Err(err) = self.bus.emit(event).await {
                    warn!(%err, "failed to publish PhaseChanged");
                }
            }
            PhaseUpdateOutcome::SkippedSame { current } => {
                debug!(project = %project_id, phase = %current, "transition to current phase, no-op");
                self.record_audit(
                    project_id, *current, target, &reason, &actor, automatic,
                    TransitionStatus::Skipped,
                );
            }
            PhaseUpdateOutcome::SkippedStale { expected, observed } => {
                warn!(
                    project = %project_id,
                    expected = %expected,
                    observed = %observed,
                    "stale transition request skipped"
                );
                self.record_audit(
                    project_id, *observed, target, &reason, &actor, automatic,
                    TransitionStatus::Skipped,
                );
            }
            PhaseUpdateOutcome::SkippedInvalid { from, to } => {
                debug!(
                    project = %project_id,
                    from = %from,
                    to = %to,
                    "rule target not reachable from current phase, skipped"
                );
                self.record_audit(
                    project_id, *from, *to, &reason, &actor, automatic,
                    TransitionStatus::Skipped,
                );
            }
        }

        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_audit(
        &self,
        project_id: ProjectId,
        from: ProjectPhase,
        to: ProjectPhase,
        trigger: &str,
        requested_by: &str,
        automatic: bool,
        status: TransitionStatus,
    ) {
        self.audit
            .write()
            .expect("audit lock poisoned")
            .push(PhaseTransitionRecord {
                project_id,
                from,
                to,
                trigger: trigger.to_string(),
                requested_by: requested_by.to_string(),
                timestamp: Utc::now(),
                automatic,
                status,
            });
    }
}
