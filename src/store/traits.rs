use crate::error::StoreResult;
use crate::logic::specification::EntitySpecification;
use crate::model::{Entity, EntityId, EntityPatch};

/// Persistence gateway for entity graphs.
///
/// Absence is never an error: lookups return `Ok(None)` or an empty list and
/// leave it to the caller to decide whether that is a failure.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Load one entity with its attributes and outgoing relations
    async fn find_by_id(&self, id: EntityId) -> StoreResult<Option<Entity>>;

    /// Entities whose type equals `entity_type` exactly
    async fn find_by_type(&self, entity_type: &str) -> StoreResult<Vec<Entity>> {
        self.find_matching(&EntitySpecification::by_type(entity_type))
            .await
    }

    /// Every entity, ordered by id
    async fn find_all(&self) -> StoreResult<Vec<Entity>> {
        self.find_matching(&EntitySpecification::all()).await
    }

    /// Entities satisfying a runtime-built specification, distinct and in its order
    async fn find_matching(&self, spec: &EntitySpecification) -> StoreResult<Vec<Entity>>;

    async fn count_matching(&self, spec: &EntitySpecification) -> StoreResult<u64>;

    async fn count(&self) -> StoreResult<u64> {
        self.count_matching(&EntitySpecification::all().for_count())
            .await
    }

    /// Insert when `entity.id` is None, otherwise replace the stored graph.
    /// Children without ids are inserted and persisted children missing from
    /// the collections are removed. All of it happens atomically.
    /// Fails with `StoreError::NotFound` when `entity.id` is no longer stored.
    async fn save(&self, entity: Entity) -> StoreResult<Entity>;

    /// Apply a patch to the stored entity and return the resulting graph.
    /// Only inserts children, so concurrent patches never drop each other's
    /// additions. Fails with `StoreError::NotFound` when `id` is not stored.
    async fn append(&self, id: EntityId, patch: EntityPatch) -> StoreResult<Entity>;

    /// Delete an entity, its attributes and its outgoing relations.
    /// Returns false when nothing was stored under `id`.
    async fn delete_by_id(&self, id: EntityId) -> StoreResult<bool>;
}
