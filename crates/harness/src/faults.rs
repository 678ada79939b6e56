use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stickies_core::{AutomationRule, EntityId, EntityRow, NewEntity, Patch};
use stickies_engine::ActionDispatcher;
use stickies_storage::{Gateway, GatewayError};

/// Gateway wrapper that fails selected calls before they reach the remote.
pub struct FlakyGateway {
    inner: Arc<dyn Gateway>,
    fail_create: AtomicBool,
    fail_update: AtomicBool,
    fail_bulk: AtomicBool,
    fail_delete: AtomicBool,
    fail_insert_raw: AtomicBool,
    fail_bulk_ids: Mutex<HashSet<EntityId>>,
}

impl FlakyGateway {
    pub fn new(inner: Arc<dyn Gateway>) -> Self {
        Self {
            inner,
            fail_create: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_bulk: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_insert_raw: AtomicBool::new(false),
            fail_bulk_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_update(&self) {
        self.fail_update.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_bulk(&self) {
        self.fail_bulk.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_insert_raw(&self) {
        self.fail_insert_raw.store(true, Ordering::SeqCst);
    }

    /// Bulk items for these ids fail; the rest are written.
    pub fn fail_bulk_items(&self, ids: impl IntoIterator<Item = EntityId>) {
        if let Ok(mut set) = self.fail_bulk_ids.lock() {
            set.extend(ids);
        }
    }

    pub fn heal(&self) {
        for flag in [
            &self.fail_create,
            &self.fail_update,
            &self.fail_bulk,
            &self.fail_delete,
            &self.fail_insert_raw,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
        if let Ok(mut set) = self.fail_bulk_ids.lock() {
            set.clear();
        }
    }

    fn tripped(flag: &AtomicBool, call: &str) -> Result<(), GatewayError> {
        if flag.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Persistence(format!("injected {call} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for FlakyGateway {
    async fn list_all(&self) -> Result<Vec<EntityRow>, GatewayError> {
        self.inner.list_all().await
    }

    async fn create(&self, new: NewEntity) -> Result<EntityRow, GatewayError> {
        Self::tripped(&self.fail_create, "create")?;
        self.inner.create(new).await
    }

    async fn update(&self, id: EntityId, patch: Patch) -> Result<EntityRow, GatewayError> {
        Self::tripped(&self.fail_update, "update")?;
        self.inner.update(id, patch).await
    }

    async fn bulk_update(
        &self,
        items: Vec<(EntityId, Patch)>,
    ) -> Result<Vec<EntityRow>, GatewayError> {
        Self::tripped(&self.fail_bulk, "bulk update")?;
        let failing = self
            .fail_bulk_ids
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default();
        let total = items.len();
        let (failed, passing): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|(id, _)| failing.contains(id));
        let rows = self.inner.bulk_update(passing).await?;
        if failed.is_empty() {
            return Ok(rows);
        }
        Err(GatewayError::PartialBatch {
            failed: failed.into_iter().map(|(id, _)| id).collect(),
            total,
        })
    }

    async fn delete(&self, id: EntityId) -> Result<(), GatewayError> {
        Self::tripped(&self.fail_delete, "delete")?;
        self.inner.delete(id).await
    }

    async fn delete_by_container(&self, name: &str) -> Result<usize, GatewayError> {
        Self::tripped(&self.fail_delete, "delete")?;
        self.inner.delete_by_container(name).await
    }

    async fn insert_raw(&self, row: EntityRow) -> Result<EntityRow, GatewayError> {
        Self::tripped(&self.fail_insert_raw, "insert")?;
        self.inner.insert_raw(row).await
    }
}

/// Action dispatcher that records what fired instead of sending anything.
#[derive(Default)]
pub struct RecordingDispatcher {
    fired: Mutex<Vec<(String, EntityId)>>,
}

impl RecordingDispatcher {
    pub fn fired(&self) -> Vec<(String, EntityId)> {
        self.fired.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

impl ActionDispatcher for RecordingDispatcher {
    fn dispatch(&self, rule: &AutomationRule, row: &EntityRow) {
        if let Ok(mut fired) = self.fired.lock() {
            fired.push((rule.name.clone(), row.id));
        }
    }
}
