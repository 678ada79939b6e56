use std::collections::BTreeMap;

use stickies_core::{Color, Entity, EntityId, Folder, Note, Patch};

use crate::error::EngineError;

/// Session-local cache of every note and folder row. Derived views read from
/// it directly; there is no separate invalidation step.
#[derive(Debug, Default, Clone)]
pub struct EntityStore {
    entities: BTreeMap<EntityId, Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&mut self, entities: impl IntoIterator<Item = Entity>) {
        self.entities = entities.into_iter().map(|e| (e.id(), e)).collect();
    }

    /// Insert or overwrite. Returns the previous value.
    pub fn upsert(&mut self, entity: Entity) -> Option<Entity> {
        self.entities.insert(entity.id(), entity)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Drop every note contained in `name` and the folder row named `name`.
    pub fn remove_by_container(&mut self, name: &str) -> Vec<Entity> {
        let ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| match e {
                Entity::Note(n) => n.folder_name == name,
                Entity::Folder(f) => f.name == name,
            })
            .map(Entity::id)
            .collect();
        ids.into_iter().filter_map(|id| self.entities.remove(&id)).collect()
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, id: EntityId, patch: &Patch) -> Result<&Entity, EngineError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EngineError::EntityNotFound(id))?;
        entity.apply_patch(patch)?;
        Ok(entity)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.entities.values().filter_map(Entity::as_note)
    }

    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.entities.values().filter_map(Entity::as_folder)
    }

    pub fn note(&self, id: EntityId) -> Option<&Note> {
        self.get(id).and_then(Entity::as_note)
    }

    pub fn folder_by_name(&self, name: &str) -> Option<&Folder> {
        self.folders().find(|f| f.name == name)
    }

    pub fn folder_exists_ignore_case(&self, name: &str) -> bool {
        let wanted = name.trim().to_lowercase();
        self.folders().any(|f| f.name.to_lowercase() == wanted)
            || self.notes().any(|n| n.folder_name.to_lowercase() == wanted)
    }

    /// Notes contained in `name`, in display order: `order` ascending, then
    /// most recently updated, then title.
    pub fn notes_in(&self, name: &str) -> Vec<&Note> {
        let mut notes: Vec<&Note> = self.notes().filter(|n| n.folder_name == name).collect();
        notes.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.title.cmp(&b.title))
        });
        notes
    }

    /// Folder rows whose parent is `parent` (`None` = top level).
    pub fn child_folders(&self, parent: Option<&str>) -> Vec<&Folder> {
        let mut folders: Vec<&Folder> = self
            .folders()
            .filter(|f| f.parent.as_deref() == parent)
            .collect();
        folders.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        folders
    }

    /// Case-insensitive match over title, body and container, most recently
    /// updated first.
    pub fn search(&self, query: &str) -> Vec<&Note> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<&Note> = self
            .notes()
            .filter(|n| {
                n.title.to_lowercase().contains(&q)
                    || n.body.to_lowercase().contains(&q)
                    || n.folder_name.to_lowercase().contains(&q)
            })
            .collect();
        hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        hits
    }

    /// Colors of the `n` most recently created notes, newest first.
    pub fn recent_note_colors(&self, n: usize) -> Vec<Color> {
        let mut notes: Vec<&Note> = self.notes().collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notes.into_iter().take(n).map(|n| n.color.clone()).collect()
    }

    pub fn folder_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .folders()
            .map(|f| f.name.clone())
            .chain(self.notes().map(|n| n.folder_name.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use stickies_core::NewEntity;

    use super::*;

    fn note(title: &str, folder: &str, order: i64) -> Entity {
        NewEntity::note(title, "body", folder).into_entity(
            EntityId::new(),
            Color::palette(0),
            order,
            Utc::now(),
        )
    }

    fn folder(name: &str, parent: Option<&str>, order: i64) -> Entity {
        NewEntity::folder(name, parent).into_entity(EntityId::new(), Color::palette(1), order, Utc::now())
    }

    #[test]
    fn replace_all_discards_previous_contents() {
        let mut store = EntityStore::new();
        store.upsert(note("old", "G", 1));
        store.replace_all(vec![note("a", "G", 1), note("b", "G", 2)]);
        assert_eq!(store.len(), 2);
        assert!(store.notes().all(|n| n.title != "old"));
    }

    #[test]
    fn remove_by_container_spares_other_folders() {
        let mut store = EntityStore::new();
        store.upsert(folder("Work", None, 1));
        store.upsert(folder("Sub", Some("Work"), 1));
        store.upsert(note("a", "Work", 1));
        store.upsert(note("b", "Home", 1));

        let removed = store.remove_by_container("Work");
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 2);
        assert!(store.folder_by_name("Sub").is_some());
        assert_eq!(store.notes_in("Home").len(), 1);
    }

    #[test]
    fn notes_in_orders_by_order_then_recency() {
        let mut store = EntityStore::new();
        let mut older = note("older", "G", 1);
        older.touch(Utc::now() - Duration::seconds(60));
        store.upsert(older);
        store.upsert(note("newer", "G", 1));
        store.upsert(note("first", "G", 0));

        let titles: Vec<&str> = store.notes_in("G").iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, ["first", "newer", "older"]);
    }

    #[test]
    fn apply_is_all_or_nothing() {
        let mut store = EntityStore::new();
        let n = note("a", "G", 1);
        let id = n.id();
        store.upsert(n);
        let bad = Patch::new().title("b").set("nonsense", 1i64);
        assert!(store.apply(id, &bad).unwrap_err().is_validation());
        assert_eq!(store.note(id).unwrap().title, "a");

        let missing = store.apply(EntityId::new(), &Patch::new().title("x"));
        assert!(matches!(missing, Err(EngineError::EntityNotFound(_))));
    }

    #[test]
    fn search_matches_container_case_insensitively() {
        let mut store = EntityStore::new();
        store.upsert(note("Milk", "Groceries", 1));
        store.upsert(note("Taxes", "Admin", 1));
        assert_eq!(store.search("grocer").len(), 1);
        assert_eq!(store.search("MILK").len(), 1);
        assert!(store.search("  ").is_empty());
    }

    #[test]
    fn folder_names_include_virtual_containers() {
        let mut store = EntityStore::new();
        store.upsert(folder("Work", None, 1));
        store.upsert(note("a", "Imported", 1));
        assert_eq!(store.folder_names(), ["Imported", "Work"]);
        assert!(store.folder_exists_ignore_case("work"));
        assert!(store.folder_exists_ignore_case("IMPORTED"));
    }
}
