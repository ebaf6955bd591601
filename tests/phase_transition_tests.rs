//! End-to-end phase transition behavior over the bus

use chrono::Utc;
use phaseflow::{
    handler_fn, CorrelationId, Event, EventBus, EventKind, EventPayload, InMemoryProjectStore,
    Meeting, MeetingId, MeetingRecordSummary, PhaseEngine, PhaseUpdateOutcome, Project,
    ProjectId, ProjectPhase, ProjectStore, SubscribeOptions, TransitionStatus,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

struct Fixture {
    bus: Arc<EventBus>,
    projects: Arc<InMemoryProjectStore>,
    engine: Arc<PhaseEngine>,
    phase_changed: Arc<Mutex<Vec<Event>>>,
}

async fn fixture(initial_phase: ProjectPhase) -> (Fixture, ProjectId) {
    let bus = Arc::new(EventBus::new());
    let projects = Arc::new(InMemoryProjectStore::new());
    let engine = Arc::new(PhaseEngine::new(projects.clone(), bus.clone()));
    engine.register().await.unwrap();

    let phase_changed = Arc::new(Mutex::new(Vec::new()));
    let sink = phase_changed.clone();
    bus.subscribe(
        EventKind::PhaseChanged,
        handler_fn(move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(event);
                Ok(())
            })
        }),
        SubscribeOptions::default(),
    )
    .await
    .unwrap();

    let mut project = Project::new("ACME growth");
    if initial_phase != ProjectPhase::default() {
        project.apply_phase_change(initial_phase, "seed", "test", false);
    }
    let id = project.id;
    projects.insert(project).await.unwrap();

    (
        Fixture {
            bus,
            projects,
            engine,
            phase_changed,
        },
        id,
    )
}

fn meeting_completed_event(project_id: ProjectId, meeting_type: &str) -> Event {
    Event::of(EventPayload::MeetingCompleted {
        meeting_id: MeetingId::new(),
        project_id,
        meeting_record: MeetingRecordSummary::of_type(meeting_type),
        completed_by: "counselor-kim".to_string(),
        completed_at: Utc::now(),
    })
}

// Scenario A: guide_1st completing on a contract_signed project yields
// exactly one PhaseChanged and one history entry.
#[tokio::test]
async fn guide_first_moves_contract_signed_to_planning() {
    let (fx, id) = fixture(ProjectPhase::ContractSigned).await;
    let history_before = fx.projects.get(&id).await.unwrap().phase_history.len();

    fx.bus
        .emit(meeting_completed_event(id, "guide_1st"))
        .await
        .unwrap();

    let project = fx.projects.get(&id).await.unwrap();
    assert_eq!(project.phase, ProjectPhase::Planning);
    assert_eq!(project.phase_history.len(), history_before + 1);

    let changed = fx.phase_changed.lock().unwrap();
    assert_eq!(changed.len(), 1);
    match &changed[0].payload {
        EventPayload::PhaseChanged {
            previous_phase,
            new_phase,
            automatic,
            ..
        } => {
            assert_eq!(*previous_phase, ProjectPhase::ContractSigned);
            assert_eq!(*new_phase, ProjectPhase::Planning);
            assert!(*automatic);
        }
        other => panic!("expected PhaseChanged payload, got {other:?}"),
    }
}

// Scenario B: the same event id emitted twice produces exactly one
// transition; the replay is suppressed by the guard.
#[tokio::test]
async fn duplicate_event_id_transitions_once() {
    let (fx, id) = fixture(ProjectPhase::ContractSigned).await;
    let event = meeting_completed_event(id, "guide_1st");

    fx.bus.emit(event.clone()).await.unwrap();
    fx.bus.emit(event).await.unwrap();

    let project = fx.projects.get(&id).await.unwrap();
    assert_eq!(project.phase, ProjectPhase::Planning);
    assert_eq!(fx.phase_changed.lock().unwrap().len(), 1);

    let history: Vec<_> = project
        .phase_history
        .iter()
        .filter(|e| e.to == ProjectPhase::Planning)
        .collect();
    assert_eq!(history.len(), 1);
}

// Scenario C: a manual request is recorded as non-automatic with its reason.
#[tokio::test]
async fn manual_transition_recorded_with_reason() {
    let (fx, id) = fixture(ProjectPhase::Planning).await;
    let outcome = fx
        .engine
        .request_manual_transition(
            id,
            ProjectPhase::Planning,
            ProjectPhase::Design,
            "ops-user",
            "skip ahead",
        )
        .await
        .unwrap();
    assert!(matches!(outcome, PhaseUpdateOutcome::Applied { .. }));

    let project = fx.projects.get(&id).await.unwrap();
    let last = project.phase_history.last().unwrap();
    assert_eq!(last.reason, "skip ahead");
    assert_eq!(last.actor, "ops-user");
    assert!(!last.automatic);

    let audit = fx.engine.transition_history(Some(&id)).await;
    let record = audit
        .iter()
        .find(|r| r.status == TransitionStatus::Completed)
        .unwrap();
    assert!(!record.automatic);
    assert_eq!(record.trigger, "skip ahead");
}

// P4: requesting the current phase is a no-op; history length unchanged.
#[tokio::test]
async fn transition_to_current_phase_leaves_history_alone() {
    let (fx, id) = fixture(ProjectPhase::Design).await;
    let before = fx.projects.get(&id).await.unwrap().phase_history.len();

    let outcome = fx
        .engine
        .request_manual_transition(
            id,
            ProjectPhase::Design,
            ProjectPhase::Design,
            "ops-user",
            "already there",
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PhaseUpdateOutcome::SkippedSame {
            current: ProjectPhase::Design
        }
    );
    assert_eq!(fx.projects.get(&id).await.unwrap().phase_history.len(), before);
    assert!(fx.phase_changed.lock().unwrap().is_empty());
}

// P5: after any sequence of valid transitions, the last history entry's `to`
// equals the current phase.
#[tokio::test]
async fn history_tail_always_matches_current_phase() {
    let (fx, id) = fixture(ProjectPhase::ContractPending).await;

    for meeting_type in ["pre_meeting", "guide_1st", "guide_2nd", "guide_3rd", "guide_4th"] {
        fx.bus
            .emit(meeting_completed_event(id, meeting_type))
            .await
            .unwrap();
        let project = fx.projects.get(&id).await.unwrap();
        assert!(project.phase_invariant_holds(), "invariant broken after {meeting_type}");
    }

    let project = fx.projects.get(&id).await.unwrap();
    assert_eq!(project.phase, ProjectPhase::Review);
    assert_eq!(project.phase_history.len(), 5);
}

// A PhaseChanged caused by a MeetingCompleted carries a correlation id
// referencing it.
#[tokio::test]
async fn phase_changed_is_correlated_to_its_cause() {
    let (fx, id) = fixture(ProjectPhase::ContractSigned).await;
    let cause = meeting_completed_event(id, "guide_1st");
    let cause_id = cause.id;

    fx.bus.emit(cause).await.unwrap();

    let changed = fx.phase_changed.lock().unwrap();
    assert_eq!(
        changed[0].correlation_id,
        Some(CorrelationId::from(cause_id))
    );
}

// A PhaseChangeRequest event over the bus behaves like the direct API.
#[tokio::test]
async fn phase_change_request_event_is_honored() {
    let (fx, id) = fixture(ProjectPhase::Planning).await;

    fx.bus
        .emit(Event::of(EventPayload::PhaseChangeRequest {
            project_id: id,
            current_phase: ProjectPhase::Planning,
            target_phase: ProjectPhase::Design,
            reason: "client approved design start".to_string(),
            requested_by: "pm-lee".to_string(),
            automatic: false,
        }))
        .await
        .unwrap();

    let project = fx.projects.get(&id).await.unwrap();
    assert_eq!(project.phase, ProjectPhase::Design);
    assert_eq!(fx.phase_changed.lock().unwrap().len(), 1);
}

// Scenario D (engine half): an unclassifiable meeting does not transition,
// and a MeetingCompleted for an unknown project is dropped, not fatal.
#[tokio::test]
async fn benign_inputs_do_not_error() {
    let (fx, id) = fixture(ProjectPhase::ContractSigned).await;

    fx.bus
        .emit(Event::of(EventPayload::MeetingCompleted {
            meeting_id: MeetingId::new(),
            project_id: id,
            meeting_record: MeetingRecordSummary::titled("팀 회식"),
            completed_by: "counselor-kim".to_string(),
            completed_at: Utc::now(),
        }))
        .await
        .unwrap();
    assert_eq!(
        fx.projects.get(&id).await.unwrap().phase,
        ProjectPhase::ContractSigned
    );

    // Unknown project: logged and dropped, emission still settles cleanly
    fx.bus
        .emit(meeting_completed_event(ProjectId::new(), "guide_1st"))
        .await
        .unwrap();
    assert_eq!(fx.bus.metrics().await.error_count, 0);
    assert!(fx.phase_changed.lock().unwrap().is_empty());
}

// Concurrent requests against the same project serialize; the loser of the
// race observes the new phase and skips instead of overwriting.
#[tokio::test]
async fn concurrent_requests_serialize_per_project() {
    let (fx, id) = fixture(ProjectPhase::Planning).await;

    let a = fx.engine.request_manual_transition(
        id,
        ProjectPhase::Planning,
        ProjectPhase::Design,
        "ops-a",
        "advance",
    );
    let b = fx.engine.request_manual_transition(
        id,
        ProjectPhase::Planning,
        ProjectPhase::Design,
        "ops-b",
        "advance",
    );
    let (ra, rb) = tokio::join!(a, b);
    let outcomes = [ra.unwrap(), rb.unwrap()];

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, PhaseUpdateOutcome::Applied { .. }))
        .count();
    assert_eq!(applied, 1);

    let project = fx.projects.get(&id).await.unwrap();
    assert_eq!(project.phase, ProjectPhase::Design);
    assert!(project.phase_invariant_holds());
    // Exactly one history entry for the contested transition
    assert_eq!(
        project
            .phase_history
            .iter()
            .filter(|e| e.to == ProjectPhase::Design)
            .count(),
        1
    );
}

// Meetings attached directly through the store still respect ownership.
#[tokio::test]
async fn meetings_live_on_their_project() {
    let (fx, id) = fixture(ProjectPhase::ContractSigned).await;
    let meeting = Meeting::new(id, "가이드 1차", Utc::now());
    fx.projects.upsert_meeting(&id, meeting).await.unwrap();
    assert_eq!(fx.projects.get(&id).await.unwrap().meetings.len(), 1);
}
