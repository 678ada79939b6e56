//! Debounced draft commits and the editor state machine.
//!
//! Idle → Editing (open) → Dirty (change) → Committing (debounce or flush) →
//! Editing. Any state → Closed on close, after a final flush attempt. A failed
//! commit returns to Editing; there is no terminal error state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stickies_core::{Color, EntityId, NewEntity, Note, Patch};
use tokio::time::Instant;

pub const UNTITLED: &str = "Untitled";

/// Resettable one-shot deadline.
#[derive(Debug, Clone)]
pub struct DebounceTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// Push the deadline out by a full delay from `now`.
    pub fn reset(&mut self, now: Instant) {
        self.schedule(now);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Disarm immediately. Returns whether a deadline was pending.
    pub fn flush_now(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// None until the first successful insert.
    pub entity_id: Option<EntityId>,
    pub title: String,
    pub body: String,
    pub folder_name: String,
    pub color: Color,
}

impl Draft {
    pub fn blank(folder_name: &str, color: Color) -> Self {
        Self {
            entity_id: None,
            title: String::new(),
            body: String::new(),
            folder_name: folder_name.to_string(),
            color,
        }
    }

    pub fn from_note(note: &Note) -> Self {
        Self {
            entity_id: Some(note.id),
            title: note.title.clone(),
            body: note.body.clone(),
            folder_name: note.folder_name.clone(),
            color: note.color.clone(),
        }
    }

    pub fn effective_title(&self) -> &str {
        let t = self.title.trim();
        if t.is_empty() { UNTITLED } else { t }
    }

    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.body.trim().is_empty()
    }

    /// Compares the persisted fields only.
    pub fn same_content(&self, other: &Draft) -> bool {
        self.effective_title() == other.effective_title()
            && self.body == other.body
            && self.folder_name == other.folder_name
            && self.color == other.color
    }

    pub fn to_patch(&self) -> Patch {
        Patch::new()
            .title(self.effective_title())
            .body(&self.body)
            .folder_name(&self.folder_name)
            .color(&self.color)
    }

    pub fn to_new_entity(&self) -> NewEntity {
        NewEntity::note(self.effective_title(), &self.body, &self.folder_name)
            .with_color(self.color.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    Idle,
    Editing,
    Dirty,
    Committing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Debounce,
    /// Page lost visibility.
    Hidden,
    Teardown,
    Close,
    ExplicitSave,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debounce => "debounce",
            Self::Hidden => "hidden",
            Self::Teardown => "teardown",
            Self::Close => "close",
            Self::ExplicitSave => "explicit_save",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoDraft,
    NotDirty,
    /// Title and body are both blank.
    EmptyDraft,
    /// A new note without body text is never inserted.
    MissingBody,
    AlreadyCommitting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Skipped(SkipReason),
    Created(EntityId),
    Updated(EntityId),
}

/// Owns the open draft, its last persisted baseline and the debounce timer.
/// Network calls are made by the session between `prepare` and
/// `complete`/`fail`.
#[derive(Debug)]
pub struct AutosaveScheduler {
    timer: DebounceTimer,
    state: EditorState,
    draft: Option<Draft>,
    baseline: Option<Draft>,
    committing: bool,
}

impl AutosaveScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            timer: DebounceTimer::new(delay),
            state: EditorState::Idle,
            draft: None,
            baseline: None,
            committing: false,
        }
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn baseline(&self) -> Option<&Draft> {
        self.baseline.as_ref()
    }

    pub fn timer(&self) -> &DebounceTimer {
        &self.timer
    }

    pub fn is_committing(&self) -> bool {
        self.committing
    }

    /// Open a draft. Existing notes start with themselves as the baseline.
    pub fn open(&mut self, draft: Draft) {
        let baseline = draft.entity_id.is_some().then(|| draft.clone());
        self.open_with_baseline(draft, baseline);
    }

    /// Open a draft whose persisted state differs from its content, as when
    /// recovering a stashed draft.
    pub fn open_with_baseline(&mut self, draft: Draft, baseline: Option<Draft>) {
        self.baseline = baseline;
        self.draft = Some(draft);
        self.timer.cancel();
        self.committing = false;
        self.state = EditorState::Editing;
        self.settle();
    }

    /// Apply a keystroke-level change and restart the debounce window.
    /// Returns false when no editor is open.
    pub fn edit(&mut self, now: Instant, change: impl FnOnce(&mut Draft)) -> bool {
        let Some(draft) = self.draft.as_mut() else {
            return false;
        };
        change(draft);
        self.timer.reset(now);
        if !self.committing {
            self.state = if self.is_dirty() {
                EditorState::Dirty
            } else {
                EditorState::Editing
            };
        }
        true
    }

    pub fn is_dirty(&self) -> bool {
        match (&self.draft, &self.baseline) {
            (Some(draft), Some(baseline)) => !draft.same_content(baseline),
            (Some(draft), None) => !draft.is_empty(),
            (None, _) => false,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.timer.is_due(now)
    }

    /// Shared gate for every flush path. On success the scheduler is in
    /// Committing and the returned draft must be persisted.
    pub fn prepare(&mut self, reason: FlushReason) -> Result<Draft, SkipReason> {
        // Edits made during a commit keep their debounce deadline.
        if self.committing {
            return Err(SkipReason::AlreadyCommitting);
        }
        self.timer.flush_now();
        let draft = self.draft.as_ref().ok_or(SkipReason::NoDraft)?;
        if !self.is_dirty() {
            return Err(SkipReason::NotDirty);
        }
        if draft.is_empty() {
            return Err(SkipReason::EmptyDraft);
        }
        if draft.entity_id.is_none() && draft.body.trim().is_empty() {
            return Err(SkipReason::MissingBody);
        }
        let draft = draft.clone();
        tracing::debug!(reason = reason.as_str(), id = ?draft.entity_id, "commit prepared");
        self.committing = true;
        self.state = EditorState::Committing;
        Ok(draft)
    }

    /// Record a successful write. `persisted` carries the server id.
    pub fn complete(&mut self, persisted: Draft) {
        self.committing = false;
        if let Some(draft) = self.draft.as_mut()
            && draft.entity_id.is_none()
        {
            draft.entity_id = persisted.entity_id;
        }
        self.baseline = Some(persisted);
        self.settle();
    }

    pub fn fail(&mut self) {
        self.committing = false;
        if self.state == EditorState::Committing {
            self.state = EditorState::Editing;
        }
    }

    fn settle(&mut self) {
        if self.state == EditorState::Closed {
            return;
        }
        self.state = if self.is_dirty() {
            EditorState::Dirty
        } else {
            EditorState::Editing
        };
    }

    /// A remote update for the open note replaces both the draft and its
    /// baseline, so it does not count as a local change.
    pub fn refresh_from_remote(&mut self, note: &Note) -> bool {
        let open = self
            .draft
            .as_ref()
            .is_some_and(|d| d.entity_id == Some(note.id));
        if !open || self.committing {
            return false;
        }
        let fresh = Draft::from_note(note);
        self.baseline = Some(fresh.clone());
        self.draft = Some(fresh);
        self.timer.cancel();
        self.state = EditorState::Editing;
        true
    }

    /// Forget the open draft when its entity was deleted remotely.
    pub fn discard_if_open(&mut self, id: EntityId) -> bool {
        let open = self.draft.as_ref().is_some_and(|d| d.entity_id == Some(id));
        if open {
            self.draft = None;
            self.baseline = None;
            self.timer.cancel();
            self.state = EditorState::Idle;
        }
        open
    }

    /// Follow a folder rename so the next commit does not resurrect the old
    /// name.
    pub fn rename_folder(&mut self, old: &str, new: &str) {
        for d in self.draft.iter_mut().chain(self.baseline.iter_mut()) {
            if d.folder_name == old {
                d.folder_name = new.to_string();
            }
        }
    }

    pub fn close(&mut self) {
        self.timer.cancel();
        self.draft = None;
        self.baseline = None;
        self.committing = false;
        self.state = EditorState::Closed;
    }
}
