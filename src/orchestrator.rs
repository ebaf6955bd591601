//! Cross-store synchronization orchestrator
//!
//! Maintains two invariants across the independently-evolving schedule and
//! project stores: every project meeting is reflected exactly once in the
//! schedule store, and every meeting-derived phase rule is evaluated exactly
//! once per meeting lifecycle event. Store APIs arrive by constructor
//! injection; the orchestrator never holds UI state or reaches into a
//! store's internals.

use crate::bus::{handler_fn, EventBus, SubscribeOptions};
use crate::convert::{meeting_to_schedule, schedule_to_meeting};
use crate::errors::{CoreError, CoreResult};
use crate::events::{Event, EventKind, EventPayload, ScheduleAction, ScheduleEventPayload};
use crate::guard::IdempotencyGuard;
use crate::identifiers::ProjectId;
use crate::phase_engine::PhaseEngine;
use crate::project::{Meeting, MeetingRecordSummary};
use crate::store::{ProjectStore, ScheduleStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Actor label used for transitions the sync layer triggers
const SYNC_ACTOR: &str = "schedule-sync";

/// Counters from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries newly inserted into the schedule store
    pub inserted: usize,
    /// Meetings already present for their project, left alone
    pub skipped_existing: usize,
    /// Duplicate meetings dropped during per-project deduplication
    pub dropped_duplicates: usize,
    /// Meetings that failed conversion or insertion and were skipped
    pub failed: usize,
}

/// Listens to schedule lifecycle events and projects them into the
/// project-side meeting collections, then evaluates phase rules
pub struct SyncOrchestrator {
    bus: Arc<EventBus>,
    projects: Arc<dyn ProjectStore>,
    schedules: Arc<dyn ScheduleStore>,
    engine: Arc<PhaseEngine>,
    guard: IdempotencyGuard,
    initial_sync_in_flight: AtomicBool,
}

impl SyncOrchestrator {
    /// Wire an orchestrator over its collaborators
    pub fn new(
        bus: Arc<EventBus>,
        projects: Arc<dyn ProjectStore>,
        schedules: Arc<dyn ScheduleStore>,
        engine: Arc<PhaseEngine>,
    ) -> Self {
        Self {
            bus,
            projects,
            schedules,
            engine,
            guard: IdempotencyGuard::new(),
            initial_sync_in_flight: AtomicBool::new(false),
        }
    }

    /// Subscribe to the four schedule kinds on the shared bus
    pub async fn register(self: &Arc<Self>) -> CoreResult<()> {
        for kind in [
            EventKind::ScheduleCreated,
            EventKind::ScheduleUpdated,
            EventKind::ScheduleDeleted,
            EventKind::ScheduleSynced,
        ] {
            let orchestrator = Arc::clone(self);
            self.bus
                .subscribe(
                    kind,
                    handler_fn(move |event| {
                        let orchestrator = Arc::clone(&orchestrator);
                        Box::pin(async move { orchestrator.on_schedule_event(event).await })
                    }),
                    SubscribeOptions::priority(20),
                )
                .await?;
        }
        Ok(())
    }

    async fn on_schedule_event(&self, event: Event) -> CoreResult<()> {
        if !self.guard.should_process(&event.id) {
            debug!(event_id = %event.id, "schedule event echo suppressed");
            return Ok(());
        }
        let EventPayload::Schedule(payload) = &event.payload else {
            warn!(kind = %event.kind(), "unexpected payload on schedule subscription");
            return Ok(());
        };

        let result = match payload.action {
            ScheduleAction::Created => self.apply_upsert(payload, Some(&event)).await,
            ScheduleAction::Updated => self.apply_upsert(payload, None).await,
            ScheduleAction::Deleted => self.apply_delete(payload).await,
            ScheduleAction::Synced => self.perform_initial_sync().await.map(|report| {
                info!(?report, "bulk sync requested over the bus");
            }),
        };

        // A missing project or a conversion failure drops this one event;
        // the next reconciliation pass is always safe and corrective.
        match result {
            Err(err) if err.is_recoverable_sync_error() => {
                warn!(%err, action = ?payload.action, "schedule event dropped");
                Ok(())
            }
            other => other,
        }
    }

    fn owning_project(&self, payload: &ScheduleEventPayload) -> CoreResult<ProjectId> {
        payload
            .metadata
            .project_id
            .or(payload.schedule.project_id)
            .ok_or_else(|| {
                CoreError::ProjectNotFound(format!(
                    "schedule entry {} carries no project reference",
                    payload.schedule.id
                ))
            })
    }

    async fn apply_upsert(
        &self,
        payload: &ScheduleEventPayload,
        evaluate_rule_for: Option<&Event>,
    ) -> CoreResult<()> {
        let project_id = self.owning_project(payload)?;
        let meeting = schedule_to_meeting(&payload.schedule)?;
        let summary = record_summary(&meeting);
        self.projects.upsert_meeting(&project_id, meeting).await?;

        if let Some(cause) = evaluate_rule_for {
            self.engine
                .trigger_from_meeting_caused_by(project_id, &summary, SYNC_ACTOR, Some(cause))
                .await?;
        }
        Ok(())
    }

    async fn apply_delete(&self, payload: &ScheduleEventPayload) -> CoreResult<()> {
        let project_id = self.owning_project(payload)?;
        let meeting_id = payload.schedule.meeting_id.ok_or_else(|| {
            CoreError::ConversionError(format!(
                "schedule entry {} has no meeting reference",
                payload.schedule.id
            ))
        })?;
        let removed = self.projects.remove_meeting(&project_id, &meeting_id).await?;
        if !removed {
            debug!(project = %project_id, meeting = %meeting_id, "delete for unknown meeting, ignored");
        }
        Ok(())
    }

    /// Cold-start reconciliation: project every embedded meeting into the
    /// schedule store exactly once.
    ///
    /// Re-entrancy guarded: a trigger while a pass is in flight is a logged
    /// no-op. Per-meeting failures are skipped and the batch continues.
    pub async fn perform_initial_sync(&self) -> CoreResult<SyncReport> {
        if self
            .initial_sync_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("initial sync already in flight, skipping");
            return Ok(SyncReport::default());
        }

        let mut report = SyncReport::default();
        for project in self.projects.list().await {
            let mut seen = HashSet::new();
            for meeting in &project.meetings {
                if !seen.insert(meeting.id) {
                    warn!(
                        project = %project.id,
                        meeting = %meeting.id,
                        "duplicate meeting dropped during reconciliation"
                    );
                    report.dropped_duplicates += 1;
                    continue;
                }
                if self
                    .schedules
                    .exists_for_project(&project.id, &meeting.id)
                    .await
                {
                    report.skipped_existing += 1;
                    continue;
                }
                let entry = match meeting_to_schedule(meeting) {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!(%err, meeting = %meeting.id, "conversion failed, meeting skipped");
                        report.failed += 1;
                        continue;
                    }
                };
                match self.schedules.insert(entry).await {
                    Ok(()) => report.inserted += 1,
                    Err(err) => {
                        warn!(%err, meeting = %meeting.id, "insert failed, meeting skipped");
                        report.failed += 1;
                    }
                }
            }
        }

        self.initial_sync_in_flight.store(false, Ordering::SeqCst);
        info!(?report, "initial reconciliation pass finished");
        Ok(report)
    }

    /// Project-side meeting edit pushed to the schedule store.
    ///
    /// Deliberately not wired to run automatically: the symmetric echo is
    /// exactly what the idempotency guard exists to prevent, so outbound
    /// propagation stays an explicit call. `Ok(false)` when the meeting was
    /// already present.
    pub async fn propagate_meeting_to_schedule(&self, meeting: &Meeting) -> CoreResult<bool> {
        if self
            .schedules
            .exists_for_project(&meeting.project_id, &meeting.id)
            .await
        {
            return Ok(false);
        }
        let entry = meeting_to_schedule(meeting)?;
        self.schedules.insert(entry).await?;
        Ok(true)
    }
}

fn record_summary(meeting: &Meeting) -> MeetingRecordSummary {
    MeetingRecordSummary {
        meeting_type: meeting.sequence.map(|s| s.as_str().to_string()),
        title: meeting.title.clone(),
        metadata: meeting.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use crate::store::{InMemoryProjectStore, InMemoryScheduleStore};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn wired() -> (
        Arc<SyncOrchestrator>,
        Arc<InMemoryProjectStore>,
        Arc<InMemoryScheduleStore>,
        Arc<EventBus>,
    ) {
        let bus = Arc::new(EventBus::new());
        let projects = Arc::new(InMemoryProjectStore::new());
        let schedules = Arc::new(InMemoryScheduleStore::new());
        let engine = Arc::new(PhaseEngine::new(projects.clone(), bus.clone()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            bus.clone(),
            projects.clone(),
            schedules.clone(),
            engine,
        ));
        (orchestrator, projects, schedules, bus)
    }

    #[tokio::test]
    async fn test_initial_sync_inserts_once() {
        let (orchestrator, projects, schedules, _bus) = wired();
        let mut project = Project::new("ACME");
        let project_id = project.id;
        project.upsert_meeting(Meeting::new(project_id, "가이드 1차", Utc::now()));
        project.upsert_meeting(Meeting::new(project_id, "가이드 2차", Utc::now()));
        projects.insert(project).await.unwrap();

        let report = orchestrator.perform_initial_sync().await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(schedules.len().await, 2);

        let second = orchestrator.perform_initial_sync().await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped_existing, 2);
        assert_eq!(schedules.len().await, 2);
    }

    #[tokio::test]
    async fn test_initial_sync_drops_embedded_duplicates() {
        let (orchestrator, projects, schedules, _bus) = wired();
        let mut project = Project::new("ACME");
        let meeting = Meeting::new(project.id, "사전미팅", Utc::now());
        // Two embedded copies of the same meeting id
        project.meetings.push(meeting.clone());
        project.meetings.push(meeting);
        projects.insert(project).await.unwrap();

        let report = orchestrator.perform_initial_sync().await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.dropped_duplicates, 1);
        assert_eq!(schedules.len().await, 1);
    }

    #[tokio::test]
    async fn test_conversion_failure_does_not_abort_batch() {
        let (orchestrator, projects, schedules, _bus) = wired();
        let mut project = Project::new("ACME");
        project.upsert_meeting(Meeting::new(project.id, "  ", Utc::now())); // unconvertible
        project.upsert_meeting(Meeting::new(project.id, "가이드 3차", Utc::now()));
        projects.insert(project).await.unwrap();

        let report = orchestrator.perform_initial_sync().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(schedules.len().await, 1);
    }

    #[tokio::test]
    async fn test_outbound_propagation_is_idempotent() {
        let (orchestrator, projects, schedules, _bus) = wired();
        let project = Project::new("ACME");
        let meeting = Meeting::new(project.id, "가이드 4차", Utc::now());
        projects.insert(project).await.unwrap();

        assert!(orchestrator.propagate_meeting_to_schedule(&meeting).await.unwrap());
        assert!(!orchestrator.propagate_meeting_to_schedule(&meeting).await.unwrap());
        assert_eq!(schedules.len().await, 1);
    }
}
