//! Pure translation between the meeting and schedule representations
//!
//! Conversion is kept separate from the stateful apply step: the
//! orchestrator decides *when* to write, these functions decide *what* the
//! other store's shape is.

use crate::errors::{CoreError, CoreResult};
use crate::identifiers::ScheduleId;
use crate::project::{Meeting, MeetingStatus};
use crate::store::ScheduleEntry;

/// Source label stamped on schedule entries produced from project meetings
pub const PROJECT_SYNC_SOURCE: &str = "project_sync";

/// Project meeting -> schedule entry
pub fn meeting_to_schedule(meeting: &Meeting) -> CoreResult<ScheduleEntry> {
    if meeting.title.trim().is_empty() {
        return Err(CoreError::ConversionError(format!(
            "meeting {} has an empty title",
            meeting.id
        )));
    }
    Ok(ScheduleEntry {
        id: ScheduleId::new(),
        title: meeting.title.clone(),
        date: meeting.scheduled_at,
        source: PROJECT_SYNC_SOURCE.to_string(),
        project_id: Some(meeting.project_id),
        meeting_id: Some(meeting.id),
        sequence: meeting.resolved_sequence(),
        completed: meeting.status == MeetingStatus::Completed,
    })
}

/// Schedule entry -> project meeting
///
/// Only entries that actually reference a project meeting can be translated;
/// a bare calendar entry has no owning project and is not this core's data.
pub fn schedule_to_meeting(entry: &ScheduleEntry) -> CoreResult<Meeting> {
    let project_id = entry.project_id.ok_or_else(|| {
        CoreError::ConversionError(format!("schedule entry {} has no project reference", entry.id))
    })?;
    let meeting_id = entry.meeting_id.ok_or_else(|| {
        CoreError::ConversionError(format!("schedule entry {} has no meeting reference", entry.id))
    })?;
    Ok(Meeting {
        id: meeting_id,
        project_id,
        title: entry.title.clone(),
        sequence: entry.sequence,
        metadata: Default::default(),
        scheduled_at: entry.date,
        status: if entry.completed {
            MeetingStatus::Completed
        } else {
            MeetingStatus::Scheduled
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::{MeetingId, ProjectId};
    use crate::project::MeetingSequence;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_meeting_to_schedule_carries_natural_key() {
        let project_id = ProjectId::new();
        let meeting = Meeting::new(project_id, "가이드 2차 미팅", Utc::now())
            .with_sequence(MeetingSequence::Guide2nd);

        let entry = meeting_to_schedule(&meeting).unwrap();
        assert_eq!(entry.project_id, Some(project_id));
        assert_eq!(entry.meeting_id, Some(meeting.id));
        assert_eq!(entry.sequence, Some(MeetingSequence::Guide2nd));
        assert_eq!(entry.source, PROJECT_SYNC_SOURCE);
        assert!(!entry.completed);
    }

    #[test]
    fn test_empty_title_fails_conversion() {
        let meeting = Meeting::new(ProjectId::new(), "  ", Utc::now());
        assert!(matches!(
            meeting_to_schedule(&meeting),
            Err(CoreError::ConversionError(_))
        ));
    }

    #[test]
    fn test_schedule_to_meeting_roundtrips_identity() {
        let project_id = ProjectId::new();
        let mut meeting = Meeting::new(project_id, "사전미팅", Utc::now());
        meeting.status = MeetingStatus::Completed;

        let entry = meeting_to_schedule(&meeting).unwrap();
        let back = schedule_to_meeting(&entry).unwrap();
        assert_eq!(back.id, meeting.id);
        assert_eq!(back.project_id, project_id);
        assert_eq!(back.status, MeetingStatus::Completed);
    }

    #[test]
    fn test_unlinked_entry_is_not_translatable() {
        let entry = ScheduleEntry {
            id: ScheduleId::new(),
            title: "팀 회식".to_string(),
            date: Utc::now(),
            source: "calendar".to_string(),
            project_id: None,
            meeting_id: Some(MeetingId::new()),
            sequence: None,
            completed: false,
        };
        assert!(schedule_to_meeting(&entry).is_err());

        let entry = ScheduleEntry {
            project_id: Some(ProjectId::new()),
            meeting_id: None,
            ..entry
        };
        assert!(schedule_to_meeting(&entry).is_err());
    }
}
