//! Store traits and in-memory implementations
//!
//! The project and schedule collections are owned by their stores and mutated
//! only through these APIs; the orchestrator never reaches into them directly.
//! Read-modify-write happens inside one write-lock critical section, which is
//! what serializes concurrent transition requests for the same project.

use crate::errors::{CoreError, CoreResult};
use crate::identifiers::{MeetingId, ProjectId, ScheduleId};
use crate::project::{Meeting, MeetingSequence, Project, ProjectPhase};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A calendar-side entry, the schedule store's representation of a meeting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// Schedule entry id
    pub id: ScheduleId,
    /// Entry title
    pub title: String,
    /// Scheduled date
    pub date: DateTime<Utc>,
    /// Where the entry came from (`"project_sync"` for synced meetings)
    pub source: String,
    /// Owning project, when the entry is a project meeting
    pub project_id: Option<ProjectId>,
    /// Natural key linking back to the project-side meeting
    pub meeting_id: Option<MeetingId>,
    /// Sequence classifier carried over from the meeting, when resolved
    pub sequence: Option<MeetingSequence>,
    /// Whether the underlying meeting completed
    #[serde(default)]
    pub completed: bool,
}

/// Outcome of a phase read-modify-write, decided under the store's write lock
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseUpdateOutcome {
    /// The transition was applied
    Applied {
        /// Phase before the transition
        previous: ProjectPhase,
        /// Phase after the transition
        new: ProjectPhase,
    },
    /// Target equals the current phase; benign no-op
    SkippedSame {
        /// The phase the project is already in
        current: ProjectPhase,
    },
    /// Observed current phase no longer matches the expectation that decided
    /// the target; benign no-op rather than an overwrite
    SkippedStale {
        /// What the caller believed the phase was
        expected: ProjectPhase,
        /// What the store actually held
        observed: ProjectPhase,
    },
    /// The transition table rejects the move; benign no-op for rule triggers
    SkippedInvalid {
        /// Current phase
        from: ProjectPhase,
        /// Rejected target
        to: ProjectPhase,
    },
}

/// Closure type applied to a project under the write lock
pub type PhaseUpdateFn = Box<dyn FnOnce(&mut Project) -> PhaseUpdateOutcome + Send>;

/// Repository seam for the project aggregate
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Load a project by id
    async fn get(&self, id: &ProjectId) -> Option<Project>;

    /// Snapshot of every project
    async fn list(&self) -> Vec<Project>;

    /// Insert a project; errors if the id already exists
    async fn insert(&self, project: Project) -> CoreResult<()>;

    /// Run a phase read-modify-write atomically against the stored project
    async fn update_phase(&self, id: &ProjectId, f: PhaseUpdateFn)
        -> CoreResult<PhaseUpdateOutcome>;

    /// Insert or replace a meeting in its owning project
    async fn upsert_meeting(&self, project_id: &ProjectId, meeting: Meeting) -> CoreResult<()>;

    /// Remove a meeting from its owning project; `Ok(false)` when absent
    async fn remove_meeting(
        &self,
        project_id: &ProjectId,
        meeting_id: &MeetingId,
    ) -> CoreResult<bool>;
}

/// Repository seam for the schedule/calendar side
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Snapshot of every entry
    async fn list(&self) -> Vec<ScheduleEntry>;

    /// Entries belonging to one project
    async fn for_project(&self, project_id: &ProjectId) -> Vec<ScheduleEntry>;

    /// Insert an entry
    async fn insert(&self, entry: ScheduleEntry) -> CoreResult<()>;

    /// Replace an entry by id; `Ok(false)` when absent
    async fn update(&self, entry: ScheduleEntry) -> CoreResult<bool>;

    /// Remove an entry by id; `Ok(false)` when absent
    async fn remove(&self, id: &ScheduleId) -> CoreResult<bool>;

    /// Project-level existence check by natural key, tolerant of store
    /// restarts where schedule ids were regenerated
    async fn exists_for_project(&self, project_id: &ProjectId, meeting_id: &MeetingId) -> bool;
}

/// In-memory project store with deterministic iteration order
pub struct InMemoryProjectStore {
    projects: RwLock<IndexMap<ProjectId, Project>>,
}

impl InMemoryProjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(IndexMap::new()),
        }
    }
}

impl Default for InMemoryProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get(&self, id: &ProjectId) -> Option<Project> {
        self.projects.read().await.get(id).cloned()
    }

    async fn list(&self) -> Vec<Project> {
        self.projects.read().await.values().cloned().collect()
    }

    async fn insert(&self, project: Project) -> CoreResult<()> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            return Err(CoreError::ValidationError(format!(
                "Project already exists: {}",
                project.id
            )));
        }
        projects.insert(project.id, project);
        Ok(())
    }

    async fn update_phase(
        &self,
        id: &ProjectId,
        f: PhaseUpdateFn,
    ) -> CoreResult<PhaseUpdateOutcome> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| CoreError::ProjectNotFound(id.to_string()))?;
        Ok(f(project))
    }

    async fn upsert_meeting(&self, project_id: &ProjectId, meeting: Meeting) -> CoreResult<()> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| CoreError::ProjectNotFound(project_id.to_string()))?;
        project.upsert_meeting(meeting);
        Ok(())
    }

    async fn remove_meeting(
        &self,
        project_id: &ProjectId,
        meeting_id: &MeetingId,
    ) -> CoreResult<bool> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| CoreError::ProjectNotFound(project_id.to_string()))?;
        Ok(project.remove_meeting(meeting_id))
    }
}

/// In-memory schedule store
pub struct InMemoryScheduleStore {
    entries: RwLock<IndexMap<ScheduleId, ScheduleEntry>>,
}

impl InMemoryScheduleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Number of entries currently held
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn list(&self) -> Vec<ScheduleEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    async fn for_project(&self, project_id: &ProjectId) -> Vec<ScheduleEntry> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.project_id.as_ref() == Some(project_id))
            .cloned()
            .collect()
    }

    async fn insert(&self, entry: ScheduleEntry) -> CoreResult<()> {
        self.entries.write().await.insert(entry.id, entry);
        Ok(())
    }

    async fn update(&self, entry: ScheduleEntry) -> CoreResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &ScheduleId) -> CoreResult<bool> {
        Ok(self.entries.write().await.shift_remove(id).is_some())
    }

    async fn exists_for_project(&self, project_id: &ProjectId, meeting_id: &MeetingId) -> bool {
        self.entries.read().await.values().any(|e| {
            e.project_id.as_ref() == Some(project_id) && e.meeting_id.as_ref() == Some(meeting_id)
        })
    }
}
