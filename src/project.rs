//! Project aggregate, meetings, and the meeting-sequence classifier
//!
//! A project is the aggregate whose lifecycle phase the engine governs. Its
//! phase history is append-only, and the current phase always equals the
//! `to` of the latest history entry (or the initial default when empty).

use crate::errors::{CoreError, CoreResult};
use crate::identifiers::{MeetingId, ProjectId};
use crate::state_machine::{State, StateTransitions};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// One discrete stage in a project's fixed, ordered lifecycle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    /// Contract drafted but not yet signed
    ContractPending,
    /// Contract signed, project ready to kick off
    ContractSigned,
    /// Planning underway
    Planning,
    /// Design underway
    Design,
    /// Execution underway
    Execution,
    /// Deliverables under review
    Review,
    /// Terminal state
    Completed,
}

impl ProjectPhase {
    /// All phases in lifecycle order
    pub const ALL: [ProjectPhase; 7] = [
        ProjectPhase::ContractPending,
        ProjectPhase::ContractSigned,
        ProjectPhase::Planning,
        ProjectPhase::Design,
        ProjectPhase::Execution,
        ProjectPhase::Review,
        ProjectPhase::Completed,
    ];

    /// Position in the lifecycle order
    pub fn ordinal(&self) -> usize {
        Self::ALL.iter().position(|p| p == self).unwrap_or(0)
    }

    /// Wire name, matching the snake_case serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectPhase::ContractPending => "contract_pending",
            ProjectPhase::ContractSigned => "contract_signed",
            ProjectPhase::Planning => "planning",
            ProjectPhase::Design => "design",
            ProjectPhase::Execution => "execution",
            ProjectPhase::Review => "review",
            ProjectPhase::Completed => "completed",
        }
    }

    /// Parse a wire name back into a phase
    pub fn parse(s: &str) -> CoreResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CoreError::ValidationError(format!("Unknown phase: {s}")))
    }
}

impl Default for ProjectPhase {
    fn default() -> Self {
        ProjectPhase::ContractPending
    }
}

impl fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl State for ProjectPhase {
    fn name(&self) -> &'static str {
        match self {
            ProjectPhase::ContractPending => "ContractPending",
            ProjectPhase::ContractSigned => "ContractSigned",
            ProjectPhase::Planning => "Planning",
            ProjectPhase::Design => "Design",
            ProjectPhase::Execution => "Execution",
            ProjectPhase::Review => "Review",
            ProjectPhase::Completed => "Completed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ProjectPhase::Completed)
    }
}

impl StateTransitions for ProjectPhase {
    // Normal operation only moves forward. Meetings can arrive out of order
    // (a guide-2nd meeting while still contract_signed), so any later phase
    // is reachable, not just the adjacent one. Backward moves are reserved
    // for the privileged manual path.
    fn can_transition_to(&self, target: &Self) -> bool {
        !self.is_terminal() && target.ordinal() > self.ordinal()
    }

    fn valid_transitions(&self) -> Vec<Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(|p| self.can_transition_to(p))
            .collect()
    }
}

/// Sequence classifier mapping a meeting to an automatic phase rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MeetingSequence {
    /// Kickoff/pre-contract meeting
    PreMeeting,
    /// First guide meeting
    #[serde(rename = "guide_1st")]
    Guide1st,
    /// Second guide meeting
    #[serde(rename = "guide_2nd")]
    Guide2nd,
    /// Third guide meeting
    #[serde(rename = "guide_3rd")]
    Guide3rd,
    /// Fourth guide meeting
    #[serde(rename = "guide_4th")]
    Guide4th,
}

impl MeetingSequence {
    /// Wire name for this classifier
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingSequence::PreMeeting => "pre_meeting",
            MeetingSequence::Guide1st => "guide_1st",
            MeetingSequence::Guide2nd => "guide_2nd",
            MeetingSequence::Guide3rd => "guide_3rd",
            MeetingSequence::Guide4th => "guide_4th",
        }
    }

    /// Parse an explicit classifier value; `None` when unrecognized
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "pre_meeting" | "premeeting" => Some(MeetingSequence::PreMeeting),
            "guide_1st" | "guide1" => Some(MeetingSequence::Guide1st),
            "guide_2nd" | "guide2" => Some(MeetingSequence::Guide2nd),
            "guide_3rd" | "guide3" => Some(MeetingSequence::Guide3rd),
            "guide_4th" | "guide4" => Some(MeetingSequence::Guide4th),
            _ => None,
        }
    }

    /// The phase this sequence deterministically maps to
    pub fn target_phase(&self) -> ProjectPhase {
        match self {
            MeetingSequence::PreMeeting => ProjectPhase::ContractSigned,
            MeetingSequence::Guide1st => ProjectPhase::Planning,
            MeetingSequence::Guide2nd => ProjectPhase::Design,
            MeetingSequence::Guide3rd => ProjectPhase::Execution,
            MeetingSequence::Guide4th => ProjectPhase::Review,
        }
    }

    /// Best-effort title heuristic, the last resort of classification.
    ///
    /// Matches the Korean meeting-title conventions ("가이드 1차", "사전미팅")
    /// plus their English equivalents. Unmatched titles return `None` and
    /// suppress automatic transition without error.
    pub fn from_title(title: &str) -> Option<Self> {
        let lower = title.to_lowercase();
        let pre = ["사전미팅", "사전 미팅", "pre-meeting", "pre meeting"];
        if pre.iter().any(|p| lower.contains(p)) {
            return Some(MeetingSequence::PreMeeting);
        }
        let guides = [
            (MeetingSequence::Guide1st, ["가이드 1차", "가이드1차", "1차 가이드", "guide 1"]),
            (MeetingSequence::Guide2nd, ["가이드 2차", "가이드2차", "2차 가이드", "guide 2"]),
            (MeetingSequence::Guide3rd, ["가이드 3차", "가이드3차", "3차 가이드", "guide 3"]),
            (MeetingSequence::Guide4th, ["가이드 4차", "가이드4차", "4차 가이드", "guide 4"]),
        ];
        for (seq, patterns) in guides {
            if patterns.iter().any(|p| lower.contains(p)) {
                return Some(seq);
            }
        }
        None
    }

    /// Three-tier resolution: explicit field, metadata field, title heuristic.
    ///
    /// Every heuristic hit is logged for data-quality review; titles are
    /// free text and the fallback is known to be brittle.
    pub fn resolve(
        explicit: Option<&str>,
        metadata: Option<&HashMap<String, serde_json::Value>>,
        title: &str,
    ) -> Option<Self> {
        if let Some(seq) = explicit.and_then(Self::parse) {
            return Some(seq);
        }
        if let Some(seq) = metadata
            .and_then(|m| m.get("meeting_type"))
            .and_then(|v| v.as_str())
            .and_then(Self::parse)
        {
            return Some(seq);
        }
        let fallback = Self::from_title(title);
        if let Some(seq) = fallback {
            warn!(
                title = %title,
                resolved = %seq.as_str(),
                "meeting sequence resolved by title heuristic"
            );
        }
        fallback
    }
}

impl fmt::Display for MeetingSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Completion/cancellation status of a meeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    /// Scheduled, not yet held
    Scheduled,
    /// Held and completed
    Completed,
    /// Cancelled
    Cancelled,
}

impl Default for MeetingStatus {
    fn default() -> Self {
        MeetingStatus::Scheduled
    }
}

/// A meeting owned by exactly one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Meeting {
    /// Meeting id
    pub id: MeetingId,
    /// Owning project
    pub project_id: ProjectId,
    /// Free-text title
    pub title: String,
    /// Explicit sequence classifier, when the source recorded one
    pub sequence: Option<MeetingSequence>,
    /// Source metadata; `meeting_type` here is the second classification tier
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Scheduled date
    pub scheduled_at: DateTime<Utc>,
    /// Completion/cancellation status
    #[serde(default)]
    pub status: MeetingStatus,
}

impl Meeting {
    /// Create a scheduled meeting
    pub fn new(project_id: ProjectId, title: impl Into<String>, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: MeetingId::new(),
            project_id,
            title: title.into(),
            sequence: None,
            metadata: HashMap::new(),
            scheduled_at,
            status: MeetingStatus::Scheduled,
        }
    }

    /// Set the explicit classifier
    pub fn with_sequence(mut self, sequence: MeetingSequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Resolve the sequence through the three-tier strategy
    pub fn resolved_sequence(&self) -> Option<MeetingSequence> {
        MeetingSequence::resolve(
            self.sequence.map(|s| s.as_str()),
            Some(&self.metadata),
            &self.title,
        )
    }
}

/// Summary of a meeting record as carried on `MeetingCompleted` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MeetingRecordSummary {
    /// Explicit classifier value (`"guide_1st"` etc.), when recorded
    #[serde(rename = "type")]
    pub meeting_type: Option<String>,
    /// Meeting title, heuristic fallback input
    #[serde(default)]
    pub title: String,
    /// Record metadata, second classification tier
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MeetingRecordSummary {
    /// Summary with only an explicit classifier
    pub fn of_type(meeting_type: impl Into<String>) -> Self {
        Self {
            meeting_type: Some(meeting_type.into()),
            title: String::new(),
            metadata: HashMap::new(),
        }
    }

    /// Summary with only a title, forcing heuristic classification
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            meeting_type: None,
            title: title.into(),
            metadata: HashMap::new(),
        }
    }

    /// Resolve the sequence through the three-tier strategy
    pub fn resolved_sequence(&self) -> Option<MeetingSequence> {
        MeetingSequence::resolve(
            self.meeting_type.as_deref(),
            Some(&self.metadata),
            &self.title,
        )
    }
}

/// One append-only entry in a project's phase history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PhaseHistoryEntry {
    /// Phase before the transition
    pub from: ProjectPhase,
    /// Phase after the transition
    pub to: ProjectPhase,
    /// Trigger reason, human readable
    pub reason: String,
    /// Who (or what rule) performed the transition
    pub actor: String,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
    /// Rule-driven vs. operator-requested
    pub automatic: bool,
}

/// The aggregate whose lifecycle the phase engine governs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    /// Project id
    pub id: ProjectId,
    /// Project name
    pub name: String,
    /// Current lifecycle phase
    pub phase: ProjectPhase,
    /// When the phase last changed
    pub phase_changed_at: DateTime<Utc>,
    /// Who last changed the phase
    pub phase_changed_by: Option<String>,
    /// Append-only transition history
    #[serde(default)]
    pub phase_history: Vec<PhaseHistoryEntry>,
    /// Owned meeting collection
    #[serde(default)]
    pub meetings: Vec<Meeting>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Create a project in the initial phase with empty history
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.into(),
            phase: ProjectPhase::default(),
            phase_changed_at: now,
            phase_changed_by: None,
            phase_history: Vec::new(),
            meetings: Vec::new(),
            created_at: now,
        }
    }

    /// Create a project with a fixed id (useful for seeding stores)
    pub fn with_id(id: ProjectId, name: impl Into<String>) -> Self {
        let mut project = Self::new(name);
        project.id = id;
        project
    }

    /// Apply a phase change: one history append and the phase field update,
    /// in one call so no observer can see them disagree.
    pub fn apply_phase_change(
        &mut self,
        to: ProjectPhase,
        reason: impl Into<String>,
        actor: impl Into<String>,
        automatic: bool,
    ) -> &PhaseHistoryEntry {
        let now = Utc::now();
        let actor = actor.into();
        self.phase_history.push(PhaseHistoryEntry {
            from: self.phase,
            to,
            reason: reason.into(),
            actor: actor.clone(),
            timestamp: now,
            automatic,
        });
        self.phase = to;
        self.phase_changed_at = now;
        self.phase_changed_by = Some(actor);
        self.phase_history.last().unwrap()
    }

    /// Current phase must equal the latest history entry's `to`
    /// (or the initial default when history is empty)
    pub fn phase_invariant_holds(&self) -> bool {
        match self.phase_history.last() {
            Some(entry) => entry.to == self.phase,
            None => self.phase == ProjectPhase::default(),
        }
    }

    /// Insert or replace a meeting by id
    pub fn upsert_meeting(&mut self, meeting: Meeting) {
        match self.meetings.iter_mut().find(|m| m.id == meeting.id) {
            Some(existing) => *existing = meeting,
            None => self.meetings.push(meeting),
        }
    }

    /// Remove a meeting by id; `false` when absent
    pub fn remove_meeting(&mut self, meeting_id: &MeetingId) -> bool {
        let before = self.meetings.len();
        self.meetings.retain(|m| &m.id != meeting_id);
        self.meetings.len() != before
    }
}
