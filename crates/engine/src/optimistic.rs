use stickies_core::{Entity, EntityId};

use crate::store::EntityStore;

/// Pre-write state of every entity an optimistic change touches.
#[derive(Debug, Clone, Default)]
pub struct PreWriteSnapshot {
    pub entity_states: Vec<EntitySnapshot>,
}

#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    pub id: EntityId,
    /// None = did not exist before the write.
    pub previous: Option<Entity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    Pending,
    Committed,
    RolledBack,
}

/// Two-phase local write: capture a snapshot, mutate the store, then either
/// commit once the remote confirms or restore the snapshot.
#[derive(Debug)]
pub struct OptimisticWrite {
    label: String,
    snapshot: PreWriteSnapshot,
    phase: WritePhase,
}

impl OptimisticWrite {
    pub fn begin(
        store: &EntityStore,
        label: &str,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Self {
        let mut write = Self {
            label: label.to_string(),
            snapshot: PreWriteSnapshot::default(),
            phase: WritePhase::Pending,
        };
        for id in ids {
            write.include(store, id);
        }
        write
    }

    /// Add an entity to the snapshot. Must be called before the store is
    /// mutated for that id; later calls for the same id are ignored.
    pub fn include(&mut self, store: &EntityStore, id: EntityId) {
        if self.snapshot.entity_states.iter().any(|s| s.id == id) {
            return;
        }
        self.snapshot.entity_states.push(EntitySnapshot {
            id,
            previous: store.get(id).cloned(),
        });
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn phase(&self) -> WritePhase {
        self.phase
    }

    pub fn touched(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.snapshot.entity_states.iter().map(|s| s.id)
    }

    pub fn commit(mut self) -> WritePhase {
        self.phase = WritePhase::Committed;
        tracing::debug!(label = %self.label, entities = self.snapshot.entity_states.len(), "optimistic write committed");
        self.phase
    }

    /// Restore every snapshotted entity, removing ones that did not exist.
    pub fn rollback(mut self, store: &mut EntityStore) -> WritePhase {
        for state in self.snapshot.entity_states.drain(..).rev() {
            match state.previous {
                Some(entity) => {
                    store.upsert(entity);
                }
                None => {
                    store.remove(state.id);
                }
            }
        }
        self.phase = WritePhase::RolledBack;
        tracing::warn!(label = %self.label, "optimistic write rolled back");
        self.phase
    }
}
