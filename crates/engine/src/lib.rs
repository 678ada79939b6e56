pub mod automation;
pub mod autosave;
pub mod commit;
pub mod config;
pub mod echo;
pub mod error;
pub mod hierarchy;
pub mod notify;
pub mod optimistic;
pub mod reorder;
pub mod store;

pub use automation::{ActionDispatcher, AutomationEngine, HttpRelayDispatcher, TriggerKind};
pub use autosave::{AutosaveScheduler, CommitOutcome, DebounceTimer, Draft, EditorState, FlushReason, SkipReason};
pub use commit::{Flush, PendingCommit, SentCommit};
pub use config::SessionConfig;
pub use echo::{EchoGuard, StaleEventDrop};
pub use error::EngineError;
pub use hierarchy::{FolderOverrides, FolderRef, FolderSummary, Navigator};
pub use notify::{Notice, Notifier};
pub use optimistic::{OptimisticWrite, WritePhase};
pub use reorder::{DragItem, DropMode, DropOutcome};
pub use store::EntityStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;
use stickies_core::{
    BusEvent, ChangeBus, Color, Entity, EntityId, EntityRow, Envelope, NewEntity, Note, Patch,
    SessionId, palette,
};
use stickies_storage::{DraftStash, Gateway, RuleSource};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::Instant;

use crate::hierarchy::ActiveItems;

const ACTIVE_DRAFT_SLOT: &str = "active-draft";
const RECENT_COLOR_WINDOW: usize = 3;

/// What the session did with one bus envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOutcome {
    Applied {
        event_type: &'static str,
        id: Option<EntityId>,
    },
    /// Created event for an id already in the store. Rules were still evaluated.
    Duplicate(EntityId),
    Dropped(StaleEventDrop),
    Resynced,
    /// Addressed away from this session.
    Ignored,
}

/// One connected client: owns the entity cache, echo ledger, editor and
/// navigation state. The entity store is only mutated by the bus handler and
/// by local optimistic writes.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    gateway: Arc<dyn Gateway>,
    bus: ChangeBus,
    rx: broadcast::Receiver<Envelope>,
    pub(crate) store: EntityStore,
    pub(crate) echo: EchoGuard,
    editor: AutosaveScheduler,
    navigator: Navigator,
    overrides: FolderOverrides,
    automation: Option<AutomationEngine>,
    pub(crate) notifier: Notifier,
    automation_banner: Option<String>,
    drafts: Option<Arc<DraftStash>>,
}

impl Session {
    /// Subscribes to `bus` immediately so no event published after this call
    /// is missed.
    pub fn new(config: SessionConfig, gateway: Arc<dyn Gateway>, bus: &ChangeBus) -> Self {
        Self {
            id: SessionId::new(),
            echo: EchoGuard::new(config.echo_grace),
            editor: AutosaveScheduler::new(config.autosave_delay),
            config,
            gateway,
            bus: bus.clone(),
            rx: bus.subscribe(),
            store: EntityStore::new(),
            navigator: Navigator::default(),
            overrides: FolderOverrides::default(),
            automation: None,
            notifier: Notifier::default(),
            automation_banner: None,
            drafts: None,
        }
    }

    pub fn with_automation(
        mut self,
        source: Arc<dyn RuleSource>,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Self {
        self.automation = Some(AutomationEngine::new(
            source,
            dispatcher,
            self.config.rule_refresh,
        ));
        self
    }

    pub fn with_draft_stash(mut self, stash: Arc<DraftStash>) -> Self {
        self.drafts = Some(stash);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn editor(&self) -> &AutosaveScheduler {
        &self.editor
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn echo_guard(&self) -> &EchoGuard {
        &self.echo
    }

    pub fn automation(&self) -> Option<&AutomationEngine> {
        self.automation.as_ref()
    }

    pub fn automation_banner(&self) -> Option<&str> {
        self.automation_banner.as_deref()
    }

    pub fn notices(&self) -> &[Notice] {
        self.notifier.pending()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notifier.drain()
    }

    pub(crate) fn rollback(&mut self, write: OptimisticWrite, err: &EngineError) {
        let action = write.label().to_string();
        write.rollback(&mut self.store);
        self.notifier.push(Notice::RolledBack {
            action,
            reason: err.to_string(),
        });
    }

    // =========================================================================
    // Sync and bus handling
    // =========================================================================

    /// Full resync: replace the cache with the remote table.
    #[tracing::instrument(skip(self), fields(subsystem = "session", op = "sync"))]
    pub async fn sync(&mut self) -> Result<usize, EngineError> {
        let rows = self.gateway.list_all().await?;
        let count = rows.len();
        self.store.replace_all(rows.into_iter().map(Entity::from));
        if let Some(automation) = self.automation.as_mut() {
            automation.refresh_if_stale(Instant::now()).await;
        }
        tracing::info!(session = %self.id, entities = count, "resynced");
        Ok(count)
    }

    /// Drain every envelope waiting on the bus. A lagged receiver triggers a
    /// full resync.
    pub async fn pump(&mut self) -> Result<Vec<BusOutcome>, EngineError> {
        let mut outcomes = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    let arrived_at = Instant::now();
                    outcomes.push(self.handle_envelope(envelope, arrived_at).await?);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(session = %self.id, skipped, "bus receiver lagged, resyncing");
                    self.sync().await?;
                    outcomes.push(BusOutcome::Resynced);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        Ok(outcomes)
    }

    pub async fn handle_envelope(
        &mut self,
        envelope: Envelope,
        arrived_at: Instant,
    ) -> Result<BusOutcome, EngineError> {
        if envelope.excludes(self.id) {
            return Ok(BusOutcome::Ignored);
        }
        let event_type = envelope.event.event_type();
        match envelope.event {
            BusEvent::EntityCreated { row } => Ok(self.apply_created(row)),
            BusEvent::EntityUpdated { row } => {
                if let Some(stale) = self.echo.check(row.id, arrived_at) {
                    tracing::debug!(id = %row.id, since = ?stale.since_local_write, "echo dropped");
                    return Ok(BusOutcome::Dropped(stale));
                }
                let id = row.id;
                let entity = Entity::from(row);
                if let Some(note) = entity.as_note()
                    && self.editor.refresh_from_remote(note)
                {
                    tracing::debug!(%id, "open draft refreshed from remote");
                }
                self.store.upsert(entity);
                Ok(BusOutcome::Applied {
                    event_type,
                    id: Some(id),
                })
            }
            BusEvent::EntityDeleted { id } => {
                if let Some(stale) = self.echo.check(id, arrived_at) {
                    return Ok(BusOutcome::Dropped(stale));
                }
                self.store.remove(id);
                self.editor.discard_if_open(id);
                Ok(BusOutcome::Applied {
                    event_type,
                    id: Some(id),
                })
            }
            BusEvent::AutomationModeStarted { message } => {
                tracing::info!(session = %self.id, %message, "automation mode started");
                self.notifier.push(Notice::AutomationBanner(message.clone()));
                self.automation_banner = Some(message);
                Ok(BusOutcome::Applied {
                    event_type,
                    id: None,
                })
            }
            BusEvent::AutomationModeEnded => {
                tracing::info!(session = %self.id, "automation mode ended");
                self.automation_banner = None;
                self.notifier.push(Notice::AutomationDone);
                self.sync().await?;
                Ok(BusOutcome::Resynced)
            }
            BusEvent::Navigate { folder, note_id } => {
                if let Some(path) = folder {
                    let folders = self.folders();
                    self.navigator.deep_link(&folders, &path);
                }
                if let Some(id) = note_id
                    && self.store.note(id).is_some()
                {
                    self.open_note(id).await?;
                }
                Ok(BusOutcome::Applied {
                    event_type,
                    id: note_id,
                })
            }
        }
    }

    fn apply_created(&mut self, row: EntityRow) -> BusOutcome {
        let id = row.id;
        if let Some(automation) = &self.automation {
            automation.on_created(&row);
        }
        let entity = Entity::from(row);
        if !entity.is_folder() {
            self.notifier.push(Notice::Added(entity.label().to_string()));
        }
        if self.store.contains(id) {
            return BusOutcome::Duplicate(id);
        }
        self.store.upsert(entity);
        BusOutcome::Applied {
            event_type: "entity-created",
            id: Some(id),
        }
    }

    /// Push the current folder path and open note to other devices.
    pub fn share_location(&self) {
        let path = self.navigator.path_token();
        self.bus.publish_excluding(
            BusEvent::Navigate {
                folder: (!path.is_empty()).then_some(path),
                note_id: self.editor.draft().and_then(|d| d.entity_id),
            },
            self.id,
        );
    }

    /// Periodic work: rule refresh, echo ledger pruning and a due autosave.
    pub async fn tick(&mut self) -> Result<Option<CommitOutcome>, EngineError> {
        let now = Instant::now();
        if let Some(automation) = self.automation.as_mut() {
            automation.refresh_if_stale(now).await;
        }
        self.echo.prune(now);
        if self.editor.is_due(now) {
            return self.flush(FlushReason::Debounce).await.map(Some);
        }
        Ok(None)
    }

    // =========================================================================
    // Editor
    // =========================================================================

    /// Open a blank draft in `folder` (or the current folder, or the default
    /// container) with a color not used by the most recent notes.
    pub async fn open_new_note(&mut self, folder: Option<&str>) -> Result<(), EngineError> {
        self.close_current_draft().await;
        let folder = folder
            .map(str::to_string)
            .or_else(|| self.navigator.current().map(str::to_string))
            .unwrap_or_else(|| self.config.default_folder.clone());
        let choices = palette::fresh_choices(&self.store.recent_note_colors(RECENT_COLOR_WINDOW));
        let color = choices
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(Color::fallback);
        self.editor.open(Draft::blank(&folder, color));
        Ok(())
    }

    pub async fn open_note(&mut self, id: EntityId) -> Result<(), EngineError> {
        let draft = self
            .store
            .note(id)
            .map(Draft::from_note)
            .ok_or(EngineError::EntityNotFound(id))?;
        if self.editor.draft().and_then(|d| d.entity_id) == Some(id) {
            return Ok(());
        }
        self.close_current_draft().await;
        self.editor.open(draft);
        Ok(())
    }

    async fn close_current_draft(&mut self) {
        if self.editor.draft().is_none() {
            return;
        }
        if let Err(e) = self.flush(FlushReason::Close).await {
            tracing::warn!(error = %e, "flush before switching drafts failed");
        }
    }

    /// Apply a keystroke-level change to the open draft. Restarts the debounce
    /// window and stashes the draft locally.
    pub fn edit(&mut self, change: impl FnOnce(&mut Draft)) -> bool {
        if !self.editor.edit(Instant::now(), change) {
            return false;
        }
        self.stash_draft();
        true
    }

    pub fn set_title(&mut self, title: &str) -> bool {
        self.edit(|d| d.title = title.to_string())
    }

    pub fn set_body(&mut self, body: &str) -> bool {
        self.edit(|d| d.body = body.to_string())
    }

    pub fn set_draft_color(&mut self, color: Color) -> bool {
        self.edit(|d| d.color = color)
    }

    pub fn set_draft_folder(&mut self, folder: &str) -> bool {
        self.edit(|d| d.folder_name = folder.to_string())
    }

    fn stash_draft(&self) {
        let (Some(stash), Some(draft)) = (&self.drafts, self.editor.draft()) else {
            return;
        };
        if let Err(e) = stash.stash(ACTIVE_DRAFT_SLOT, draft) {
            tracing::warn!(error = %e, "draft stash failed");
        }
    }

    fn clear_stash(&self) {
        if let Some(stash) = &self.drafts
            && let Err(e) = stash.clear(ACTIVE_DRAFT_SLOT)
        {
            tracing::warn!(error = %e, "draft stash clear failed");
        }
    }

    /// Reopen a draft stashed by an earlier run. Returns whether one was found.
    pub fn recover_draft(&mut self) -> Result<bool, EngineError> {
        let Some(stash) = &self.drafts else {
            return Ok(false);
        };
        let Some(draft) = stash.load::<Draft>(ACTIVE_DRAFT_SLOT)? else {
            return Ok(false);
        };
        let baseline = draft
            .entity_id
            .and_then(|id| self.store.note(id))
            .map(Draft::from_note);
        tracing::info!(id = ?draft.entity_id, "recovered stashed draft");
        self.editor.open_with_baseline(draft, baseline);
        Ok(true)
    }

    pub async fn save(&mut self) -> Result<CommitOutcome, EngineError> {
        self.flush(FlushReason::ExplicitSave).await
    }

    pub async fn visibility_hidden(&mut self) -> Result<CommitOutcome, EngineError> {
        self.flush(FlushReason::Hidden).await
    }

    pub async fn teardown(&mut self) -> Result<CommitOutcome, EngineError> {
        self.flush(FlushReason::Teardown).await
    }

    /// Final flush, then close. The editor closes even if the flush fails;
    /// the stashed draft survives for recovery.
    pub async fn close_editor(&mut self) -> Result<CommitOutcome, EngineError> {
        let result = self.flush(FlushReason::Close).await;
        self.editor.close();
        result
    }

    /// The single commit path behind debounce, visibility loss, teardown,
    /// close and explicit save.
    #[tracing::instrument(skip(self), fields(subsystem = "autosave", op = "flush"))]
    pub async fn flush(&mut self, reason: FlushReason) -> Result<CommitOutcome, EngineError> {
        match self.begin_flush(reason)? {
            Flush::Skipped(skip) => Ok(CommitOutcome::Skipped(skip)),
            Flush::Pending(pending) => {
                let sent = pending.send().await;
                self.finish_flush(sent)
            }
        }
    }

    fn next_note_order(&self, folder: &str) -> i64 {
        self.store
            .notes_in(folder)
            .iter()
            .map(|n| n.order)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn next_folder_order(&self, parent: Option<&str>) -> i64 {
        self.store
            .child_folders(parent)
            .iter()
            .map(|f| f.order)
            .max()
            .unwrap_or(0)
            + 1
    }

    // =========================================================================
    // Derived views and navigation
    // =========================================================================

    pub fn folders(&self) -> Vec<FolderSummary> {
        hierarchy::resolve_folders(&self.store, &self.overrides, &self.config.system_folders)
    }

    pub fn active_items(&self) -> ActiveItems<'_> {
        let folders = self.folders();
        hierarchy::active_items(&self.store, &folders, self.navigator.current())
    }

    pub fn search(&self, query: &str) -> Vec<&Note> {
        self.store.search(query)
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.store.folder_names()
    }

    pub fn enter_folder(&mut self, name: &str) -> Result<(), EngineError> {
        let folders = self.folders();
        self.navigator.enter(&folders, name)
    }

    pub fn back(&mut self) -> Option<String> {
        self.navigator.back().map(str::to_string)
    }

    pub fn go_to(&mut self, index: usize) {
        self.navigator.go_to(index);
    }

    /// Restore folder path and note from shareable tokens.
    pub async fn deep_link(
        &mut self,
        folder_path: &str,
        note_token: Option<&str>,
    ) -> Result<Option<EntityId>, EngineError> {
        let folders = self.folders();
        let folder = self.navigator.deep_link(&folders, folder_path).map(str::to_string);
        let Some(token) = note_token else {
            return Ok(None);
        };
        let found = hierarchy::resolve_note_token(&self.store, folder.as_deref(), token);
        if let Some(id) = found {
            self.open_note(id).await?;
        }
        Ok(found)
    }

    // =========================================================================
    // Optimistic write helpers
    // =========================================================================

    pub(crate) async fn optimistic_update(
        &mut self,
        label: &str,
        id: EntityId,
        patch: Patch,
    ) -> Result<(), EngineError> {
        let write = OptimisticWrite::begin(&self.store, label, [id]);
        self.store.apply(id, &patch)?;
        self.echo.record_local_write(id);
        match self.gateway.update(id, patch).await {
            Ok(row) => {
                write.commit();
                self.store.upsert(Entity::from(row));
                Ok(())
            }
            Err(e) => {
                let err = EngineError::from(e);
                self.rollback(write, &err);
                Err(err)
            }
        }
    }

    /// Apply every patch locally, then persist as one bulk call. Any failure
    /// rolls back the whole batch.
    pub(crate) async fn optimistic_bulk(
        &mut self,
        label: &str,
        items: Vec<(EntityId, Patch)>,
    ) -> Result<(), EngineError> {
        let write = OptimisticWrite::begin(&self.store, label, items.iter().map(|(id, _)| *id));
        for (id, patch) in &items {
            if let Err(e) = self.store.apply(*id, patch).map(|_| ()) {
                write.rollback(&mut self.store);
                return Err(e);
            }
            self.echo.record_local_write(*id);
        }
        match self.gateway.bulk_update(items).await {
            Ok(rows) => {
                write.commit();
                for row in rows {
                    self.store.upsert(Entity::from(row));
                }
                Ok(())
            }
            Err(e) => {
                let err = EngineError::from(e);
                self.rollback(write, &err);
                self.resync_after_partial(&err).await;
                Err(err)
            }
        }
    }

    /// Rows a partial batch did write are hidden from this session by the echo
    /// guard, so reread the whole table.
    async fn resync_after_partial(&mut self, err: &EngineError) {
        if !matches!(err, EngineError::PartialBatch { .. }) {
            return;
        }
        if let Err(e) = self.sync().await {
            tracing::warn!(error = %e, "resync after partial batch failed");
        }
    }

    // =========================================================================
    // Folder operations
    // =========================================================================

    pub async fn create_folder(
        &mut self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<EntityId, EngineError> {
        let new = NewEntity::folder(name, parent);
        new.validate()?;
        if self.store.folder_exists_ignore_case(name) {
            self.notifier.push(Notice::FolderExists(name.trim().to_string()));
            return Err(EngineError::Validation(format!("folder {} already exists", name.trim())));
        }
        let color = palette::least_used(self.store.folders().map(|f| &f.color));
        let order = self.store.folders().map(|f| f.order).max().unwrap_or(0) + 1;
        let new = new.with_color(color.clone());

        let provisional = EntityId::new();
        let write = OptimisticWrite::begin(&self.store, "Create folder", [provisional]);
        self.store
            .upsert(new.clone().into_entity(provisional, color, order, Utc::now()));
        match self.gateway.create(new).await {
            Ok(row) => {
                write.commit();
                self.store.remove(provisional);
                let id = row.id;
                self.store.upsert(Entity::from(row));
                Ok(id)
            }
            Err(e) => {
                let err = EngineError::from(e);
                self.rollback(write, &err);
                Err(err)
            }
        }
    }

    /// Rename a folder and every reference to it: the row itself, contained
    /// notes and child folders. Renaming a name nothing references is a no-op.
    #[tracing::instrument(skip(self), fields(subsystem = "hierarchy", op = "rename"))]
    pub async fn rename_folder(&mut self, old: &str, new: &str) -> Result<usize, EngineError> {
        let new = new.trim();
        if new.is_empty() {
            return Err(EngineError::Validation("folder name is required".into()));
        }
        if old == new {
            return Ok(0);
        }
        let mut patches: BTreeMap<EntityId, Patch> = BTreeMap::new();
        for entity in self.store.iter() {
            match entity {
                Entity::Note(n) if n.folder_name == old => {
                    patches.insert(n.id, Patch::new().folder_name(new));
                }
                Entity::Folder(f) => {
                    let mut patch = Patch::new();
                    if f.name == old {
                        patch = patch.folder_name(new);
                    }
                    if f.parent.as_deref() == Some(old) {
                        patch = patch.parent(Some(new));
                    }
                    if !patch.is_empty() {
                        patches.insert(f.id, patch);
                    }
                }
                _ => {}
            }
        }
        if patches.is_empty() {
            return Ok(0);
        }
        let lowered = new.to_lowercase();
        if self
            .store
            .folder_names()
            .iter()
            .any(|n| n != old && n.to_lowercase() == lowered)
        {
            self.notifier.push(Notice::FolderExists(new.to_string()));
            return Err(EngineError::Validation(format!("folder {new} already exists")));
        }
        let count = patches.len();
        self.optimistic_bulk("Rename folder", patches.into_iter().collect())
            .await?;
        self.overrides.rename(old, new);
        self.navigator.rename(old, new);
        self.editor.rename_folder(old, new);
        Ok(count)
    }

    /// Move every note and child folder of `source` into `target`, then delete
    /// the `source` row.
    #[tracing::instrument(skip(self), fields(subsystem = "hierarchy", op = "merge"))]
    pub async fn merge_folder(&mut self, source: &str, target: &str) -> Result<usize, EngineError> {
        if source == target {
            return Err(EngineError::Validation("cannot merge a folder into itself".into()));
        }
        let folders = self.folders();
        let source_summary = hierarchy::find(&folders, source)
            .ok_or_else(|| EngineError::FolderNotFound(source.to_string()))?;
        let target_summary = hierarchy::find(&folders, target)
            .ok_or_else(|| EngineError::FolderNotFound(target.to_string()))?;
        // A direct child takes the source's place; deeper descendants are refused.
        if target_summary.parent.as_deref() != Some(source)
            && hierarchy::is_descendant(&folders, target, source)
        {
            return Err(EngineError::Validation(format!(
                "cannot merge {source} into its descendant {target}"
            )));
        }
        let source_parent = source_summary.parent.clone();
        let source_row = match &source_summary.folder {
            FolderRef::Row(id) => Some(*id),
            FolderRef::Virtual(_) => None,
        };

        // Moved items are appended after the target scope's current members.
        let mut items: Vec<(EntityId, Patch)> = Vec::new();
        let mut note_order = self.next_note_order(target);
        for n in self.store.notes_in(source) {
            items.push((n.id, Patch::new().folder_name(target).order(note_order)));
            note_order += 1;
        }
        let mut folder_order = self.next_folder_order(Some(target));
        for f in self.store.child_folders(Some(source)) {
            let patch = if f.name == target {
                Patch::new()
                    .parent(source_parent.as_deref())
                    .order(self.next_folder_order(source_parent.as_deref()))
            } else {
                let patch = Patch::new().parent(Some(target)).order(folder_order);
                folder_order += 1;
                patch
            };
            items.push((f.id, patch));
        }
        let moved = items.len();

        let mut write =
            OptimisticWrite::begin(&self.store, "Merge folder", items.iter().map(|(id, _)| *id));
        if let Some(id) = source_row {
            write.include(&self.store, id);
        }
        for (id, patch) in &items {
            if let Err(e) = self.store.apply(*id, patch).map(|_| ()) {
                write.rollback(&mut self.store);
                return Err(e);
            }
            self.echo.record_local_write(*id);
        }
        if let Some(id) = source_row {
            self.store.remove(id);
            self.echo.record_local_write(id);
        }

        let mut result = Ok(());
        if !items.is_empty() {
            result = self.gateway.bulk_update(items).await.map(|_| ());
        }
        if result.is_ok()
            && let Some(id) = source_row
        {
            result = self.gateway.delete(id).await;
        }
        if let Err(e) = result {
            let err = EngineError::from(e);
            self.rollback(write, &err);
            self.resync_after_partial(&err).await;
            return Err(err);
        }
        write.commit();
        self.overrides.forget(source);
        self.navigator.forget(source);
        self.editor.rename_folder(source, target);
        Ok(moved)
    }

    /// Re-parent a materialized folder. Virtual folders and moves that would
    /// create a cycle are rejected.
    pub async fn move_folder(&mut self, name: &str, new_parent: Option<&str>) -> Result<(), EngineError> {
        let folder = self.store.folder_by_name(name).ok_or_else(|| {
            EngineError::Validation(format!("{name} is virtual and cannot be moved"))
        })?;
        let (id, current_parent) = (folder.id, folder.parent.clone());
        if let Some(parent) = new_parent {
            let folders = self.folders();
            if parent == name || hierarchy::is_descendant(&folders, parent, name) {
                return Err(EngineError::Validation(format!(
                    "cannot move {name} under {parent}"
                )));
            }
        }
        if current_parent.as_deref() == new_parent {
            return Ok(());
        }
        let order = self.next_folder_order(new_parent);
        self.optimistic_update("Move folder", id, Patch::new().parent(new_parent).order(order))
            .await
    }

    /// Delete the folder row and every note it contains. Sub-folders stay.
    #[tracing::instrument(skip(self), fields(subsystem = "hierarchy", op = "delete"))]
    pub async fn delete_folder(&mut self, name: &str) -> Result<usize, EngineError> {
        let ids: Vec<EntityId> = self
            .store
            .iter()
            .filter(|e| match e {
                Entity::Note(n) => n.folder_name == name,
                Entity::Folder(f) => f.name == name,
            })
            .map(Entity::id)
            .collect();
        if ids.is_empty() {
            return Err(EngineError::FolderNotFound(name.to_string()));
        }
        let write = OptimisticWrite::begin(&self.store, "Delete folder", ids.iter().copied());
        self.store.remove_by_container(name);
        for id in &ids {
            self.echo.record_local_write(*id);
        }
        match self.gateway.delete_by_container(name).await {
            Ok(removed) => {
                write.commit();
                for id in &ids {
                    self.editor.discard_if_open(*id);
                }
                self.navigator.forget(name);
                self.overrides.forget(name);
                Ok(removed)
            }
            Err(e) => {
                let err = EngineError::from(e);
                self.rollback(write, &err);
                Err(err)
            }
        }
    }

    /// Persist the icon on the folder row, or keep it as a local override for
    /// virtual folders.
    pub async fn set_folder_icon(&mut self, name: &str, icon: Option<&str>) -> Result<(), EngineError> {
        match self.store.folder_by_name(name).map(|f| f.id) {
            Some(id) => {
                self.optimistic_update("Set icon", id, Patch::new().icon(icon))
                    .await
            }
            None => {
                self.overrides.set_icon(name, icon);
                Ok(())
            }
        }
    }

    pub fn set_folder_color_override(&mut self, name: &str, color: Option<Color>) {
        self.overrides.set_color(name, color);
    }

    // =========================================================================
    // Note operations
    // =========================================================================

    pub async fn move_note(&mut self, id: EntityId, folder: &str) -> Result<(), EngineError> {
        let folder = folder.trim();
        let note = self.store.note(id).ok_or(EngineError::EntityNotFound(id))?;
        if folder.is_empty() {
            return Err(EngineError::Validation("folder name is required".into()));
        }
        if note.folder_name == folder {
            return Ok(());
        }
        let order = self.next_note_order(folder);
        self.optimistic_update("Move note", id, Patch::new().folder_name(folder).order(order))
            .await
    }

    pub async fn delete_note(&mut self, id: EntityId) -> Result<(), EngineError> {
        if self.store.note(id).is_none() {
            return Err(EngineError::EntityNotFound(id));
        }
        let write = OptimisticWrite::begin(&self.store, "Delete note", [id]);
        self.store.remove(id);
        self.echo.record_local_write(id);
        match self.gateway.delete(id).await {
            Ok(()) => {
                write.commit();
                self.editor.discard_if_open(id);
                Ok(())
            }
            Err(e) => {
                let err = EngineError::from(e);
                self.rollback(write, &err);
                Err(err)
            }
        }
    }

    pub async fn toggle_list_mode(&mut self, id: EntityId) -> Result<bool, EngineError> {
        let on = !self
            .store
            .note(id)
            .ok_or(EngineError::EntityNotFound(id))?
            .list_mode;
        self.optimistic_update("List mode", id, Patch::new().list_mode(on))
            .await?;
        Ok(on)
    }

    /// Batch import through the gateway. Successful rows land in the cache
    /// immediately; failures are reported per item.
    pub async fn import(&mut self, items: Vec<NewEntity>) -> Vec<Result<EntityId, EngineError>> {
        let results = self.gateway.import(items).await;
        results
            .into_iter()
            .map(|r| match r {
                Ok(row) => {
                    let id = row.id;
                    self.store.upsert(Entity::from(row));
                    Ok(id)
                }
                Err(e) => Err(EngineError::from(e)),
            })
            .collect()
    }
}
