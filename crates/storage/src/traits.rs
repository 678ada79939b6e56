use async_trait::async_trait;

use stickies_core::{AutomationRule, EntityId, EntityRow, NewEntity, Patch};

use crate::error::GatewayError;

/// Contract to the remote note table. Every successful write is also announced
/// on the change bus by the remote side, so callers never publish mutation
/// events themselves.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Full read, ordered by kind then `order`.
    async fn list_all(&self) -> Result<Vec<EntityRow>, GatewayError>;

    /// Insert with defaults: a missing color becomes the least-used palette
    /// color and `order` is appended after the last sibling of the same kind.
    async fn create(&self, new: NewEntity) -> Result<EntityRow, GatewayError>;

    /// Partial update. Returns the full row after the write.
    async fn update(&self, id: EntityId, patch: Patch) -> Result<EntityRow, GatewayError>;

    /// Applies every item independently. If any item fails the call reports
    /// `PartialBatch` naming the failures; items that succeeded stay written.
    async fn bulk_update(
        &self,
        items: Vec<(EntityId, Patch)>,
    ) -> Result<Vec<EntityRow>, GatewayError>;

    async fn delete(&self, id: EntityId) -> Result<(), GatewayError>;

    /// Delete every row whose `folder_name` equals `name`: the notes contained
    /// in that folder and the folder row itself. Sub-folders are untouched.
    async fn delete_by_container(&self, name: &str) -> Result<usize, GatewayError>;

    /// Insert the payload as given, skipping color and order defaults. The
    /// table assigns the id.
    async fn insert_raw(&self, row: EntityRow) -> Result<EntityRow, GatewayError>;

    /// Batch import in order. Each item reports its own outcome.
    async fn import(&self, items: Vec<NewEntity>) -> Vec<Result<EntityRow, GatewayError>> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(self.create(item).await);
        }
        results
    }
}

/// Read-only access to the automation table, polled periodically.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn list_active_rules(&self) -> Result<Vec<AutomationRule>, GatewayError>;
}
