//! Order reconciler. Drag gestures resolve to a new sibling sequence that is
//! applied locally, renumbered 1..n and persisted as one bulk update.

use chrono::Utc;
use stickies_core::{Entity, EntityId, EntityRow, NewEntity, Patch};

use crate::error::EngineError;
use crate::hierarchy;
use crate::notify::Notice;
use crate::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropMode {
    Before,
    After,
    /// Target is a folder and the dragged item becomes its content.
    Into,
}

/// Folders are addressed by name, which also covers virtual ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragItem {
    Note(EntityId),
    Folder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    /// Persisted sibling sequence, first to last.
    Reordered(Vec<EntityId>),
    Moved,
    Unchanged,
}

/// Remove `dragged` from `items` and reinsert it next to `target`. None when
/// the gesture is not a reorder or either key is missing.
pub fn insert_by_key<K: PartialEq + Clone>(
    items: &[K],
    dragged: &K,
    target: &K,
    mode: DropMode,
) -> Option<Vec<K>> {
    if mode == DropMode::Into || dragged == target || !items.contains(dragged) {
        return None;
    }
    let mut seq: Vec<K> = items.iter().filter(|k| *k != dragged).cloned().collect();
    let mut at = seq.iter().position(|k| k == target)?;
    if mode == DropMode::After {
        at += 1;
    }
    seq.insert(at, dragged.clone());
    Some(seq)
}

/// `order = index + 1` for every member.
pub fn dense_orders(ids: &[EntityId]) -> Vec<(EntityId, i64)> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| (*id, i as i64 + 1))
        .collect()
}

fn order_patches(ids: &[EntityId]) -> Vec<(EntityId, Patch)> {
    dense_orders(ids)
        .into_iter()
        .map(|(id, order)| (id, Patch::new().order(order)))
        .collect()
}

impl Session {
    /// Apply a completed drag gesture.
    #[tracing::instrument(skip(self), fields(subsystem = "reorder", op = "drop"))]
    pub async fn drop_item(
        &mut self,
        dragged: DragItem,
        target: DragItem,
        mode: DropMode,
    ) -> Result<DropOutcome, EngineError> {
        match (dragged, target, mode) {
            (DragItem::Note(id), DragItem::Folder(folder), DropMode::Into) => {
                let note = self.store.note(id).ok_or(EngineError::EntityNotFound(id))?;
                if note.folder_name == folder {
                    return Ok(DropOutcome::Unchanged);
                }
                self.move_note(id, &folder).await?;
                Ok(DropOutcome::Moved)
            }
            (DragItem::Folder(name), DragItem::Folder(target), DropMode::Into) => {
                if name == target {
                    return Ok(DropOutcome::Unchanged);
                }
                if self.store.folder_by_name(&name).is_none()
                    && self.materialize_or_notify(&name, None, 0).await.is_none()
                {
                    return Ok(DropOutcome::Unchanged);
                }
                self.move_folder(&name, Some(&target)).await?;
                Ok(DropOutcome::Moved)
            }
            (_, DragItem::Note(_), DropMode::Into) => Err(EngineError::Validation(
                "items can only be dropped into a folder".into(),
            )),
            (DragItem::Note(dragged), DragItem::Note(target), mode) => {
                self.reorder_notes(dragged, target, mode).await
            }
            (DragItem::Folder(dragged), DragItem::Folder(target), mode) => {
                self.reorder_folders(&dragged, &target, mode).await
            }
            _ => Err(EngineError::Validation(
                "notes and folders are not siblings".into(),
            )),
        }
    }

    async fn reorder_notes(
        &mut self,
        dragged: EntityId,
        target: EntityId,
        mode: DropMode,
    ) -> Result<DropOutcome, EngineError> {
        let scope = self
            .store
            .note(dragged)
            .ok_or(EngineError::EntityNotFound(dragged))?
            .folder_name
            .clone();
        let target_scope = &self
            .store
            .note(target)
            .ok_or(EngineError::EntityNotFound(target))?
            .folder_name;
        if *target_scope != scope {
            return Err(EngineError::Validation(format!(
                "notes in {scope} and {target_scope} are not siblings"
            )));
        }
        let current: Vec<EntityId> = self.store.notes_in(&scope).iter().map(|n| n.id).collect();
        let Some(seq) = insert_by_key(&current, &dragged, &target, mode) else {
            return Ok(DropOutcome::Unchanged);
        };
        if seq == current && self.is_dense(&seq) {
            return Ok(DropOutcome::Unchanged);
        }
        self.persist_sequence("Reorder", &seq).await?;
        Ok(DropOutcome::Reordered(seq))
    }

    async fn reorder_folders(
        &mut self,
        dragged: &str,
        target: &str,
        mode: DropMode,
    ) -> Result<DropOutcome, EngineError> {
        if self.config.is_system_folder(dragged) || self.config.is_system_folder(target) {
            return Err(EngineError::Validation("system folders stay pinned".into()));
        }
        let folders = self.folders();
        let dragged_parent = hierarchy::find(&folders, dragged)
            .ok_or_else(|| EngineError::FolderNotFound(dragged.to_string()))?
            .parent
            .clone();
        let target_parent = &hierarchy::find(&folders, target)
            .ok_or_else(|| EngineError::FolderNotFound(target.to_string()))?
            .parent;
        if dragged_parent != *target_parent {
            return Err(EngineError::Validation(format!(
                "{dragged} and {target} are not siblings"
            )));
        }
        let names: Vec<String> = hierarchy::children_of(&folders, dragged_parent.as_deref())
            .into_iter()
            .filter(|f| !self.config.is_system_folder(&f.name))
            .map(|f| f.name.clone())
            .collect();
        let Some(seq) = insert_by_key(&names, &dragged.to_string(), &target.to_string(), mode)
        else {
            return Ok(DropOutcome::Unchanged);
        };

        let mut ids = Vec::with_capacity(seq.len());
        for (index, name) in seq.iter().enumerate() {
            if let Some(folder) = self.store.folder_by_name(name) {
                ids.push(folder.id);
                continue;
            }
            let order = index as i64 + 1;
            match self
                .materialize_or_notify(name, dragged_parent.as_deref(), order)
                .await
            {
                Some(id) => ids.push(id),
                None if name == dragged => return Ok(DropOutcome::Unchanged),
                None => {}
            }
        }
        if ids.len() < 2 {
            return Ok(DropOutcome::Unchanged);
        }
        self.persist_sequence("Reorder folders", &ids).await?;
        Ok(DropOutcome::Reordered(ids))
    }

    fn is_dense(&self, ids: &[EntityId]) -> bool {
        dense_orders(ids)
            .into_iter()
            .all(|(id, order)| self.store.get(id).map(Entity::order) == Some(order))
    }

    /// Renumber `ids` to 1..n, optimistically, in one bulk update. Any failure
    /// restores the whole prior sequence.
    pub async fn persist_sequence(&mut self, label: &str, ids: &[EntityId]) -> Result<(), EngineError> {
        tracing::debug!(label, members = ids.len(), "persisting sibling sequence");
        self.optimistic_bulk(label, order_patches(ids)).await
    }

    /// Create the missing row for a virtual folder, carrying its resolved color
    /// and icon.
    pub async fn materialize_folder(
        &mut self,
        name: &str,
        parent: Option<&str>,
        order: i64,
    ) -> Result<EntityId, EngineError> {
        if let Some(existing) = self.store.folder_by_name(name) {
            return Ok(existing.id);
        }
        let folders = self.folders();
        let summary = hierarchy::find(&folders, name)
            .ok_or_else(|| EngineError::FolderNotFound(name.to_string()))?;
        let mut entity = NewEntity::folder(name, parent).into_entity(
            EntityId::new(),
            summary.color.clone(),
            order,
            Utc::now(),
        );
        if let Entity::Folder(folder) = &mut entity {
            folder.icon = summary.icon.clone();
        }
        let row = self.gateway.insert_raw(EntityRow::from(entity)).await?;
        let id = row.id;
        tracing::info!(folder = name, %id, "virtual folder materialized");
        self.store.upsert(Entity::from(row));
        Ok(id)
    }

    async fn materialize_or_notify(
        &mut self,
        name: &str,
        parent: Option<&str>,
        order: i64,
    ) -> Option<EntityId> {
        match self.materialize_folder(name, parent, order).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(folder = name, error = %e, "materialize failed");
                self.notifier.push(Notice::RolledBack {
                    action: format!("Materialize {name}"),
                    reason: e.to_string(),
                });
                None
            }
        }
    }
}
