use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};
use crate::logic::specification::EntitySpecification;
use crate::model::{Entity, EntityId, EntityPatch, Relation};
use crate::store::traits::EntityStore;

#[derive(Debug)]
struct MemoryState {
    entities: BTreeMap<EntityId, Entity>,
    next_entity_id: EntityId,
    next_attribute_id: i64,
    next_relation_id: i64,
}

impl MemoryState {
    fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_entity_id: 1,
            next_attribute_id: 1,
            next_relation_id: 1,
        }
    }

    /// Everything that could make a write to `id` fail, checked before any mutation
    fn validate(
        &self,
        id: Option<EntityId>,
        entity_type: Option<&str>,
        relations: &[Relation],
    ) -> StoreResult<()> {
        if let Some(id) = id {
            if !self.entities.contains_key(&id) {
                return Err(StoreError::NotFound(id));
            }
        }

        if let Some(entity_type) = entity_type {
            let duplicate = self
                .entities
                .values()
                .any(|stored| stored.entity_type == entity_type && stored.id != id);
            if duplicate {
                return Err(StoreError::DuplicateType(entity_type.to_string()));
            }
        }

        for relation in relations {
            let self_reference = id == Some(relation.target_id);
            if !self_reference && !self.entities.contains_key(&relation.target_id) {
                return Err(StoreError::MissingTarget(relation.target_id));
            }
        }

        Ok(())
    }

    fn assign_ids(&mut self, entity: &mut Entity) -> EntityId {
        let id = match entity.id {
            Some(id) => id,
            None => {
                let id = self.next_entity_id;
                self.next_entity_id += 1;
                id
            }
        };
        self.next_entity_id = self.next_entity_id.max(id + 1);
        entity.id = Some(id);

        for attribute in entity.attributes.iter_mut().filter(|a| a.id.is_none()) {
            attribute.id = Some(self.next_attribute_id);
            self.next_attribute_id += 1;
        }
        for relation in entity.relations.iter_mut().filter(|r| r.id.is_none()) {
            relation.id = Some(self.next_relation_id);
            self.next_relation_id += 1;
        }

        id
    }
}

/// In-process store backed by a lock-guarded map.
///
/// Each call holds the lock for its whole duration, and `save` validates
/// before it mutates, so a failed call leaves the state untouched.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn find_by_id(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        Ok(self.state.read().entities.get(&id).cloned())
    }

    async fn find_matching(&self, spec: &EntitySpecification) -> StoreResult<Vec<Entity>> {
        let mut matching: Vec<Entity> = {
            let state = self.state.read();
            state
                .entities
                .values()
                .filter(|entity| spec.matches(entity))
                .cloned()
                .collect()
        };

        if !spec.fetch_collections {
            for entity in &mut matching {
                entity.attributes.clear();
                entity.relations.clear();
            }
        }

        spec.sort(&mut matching);
        log::debug!("Memory store matched {} entities", matching.len());
        Ok(matching)
    }

    async fn count_matching(&self, spec: &EntitySpecification) -> StoreResult<u64> {
        let state = self.state.read();
        let count = state.entities.values().filter(|e| spec.matches(e)).count();
        Ok(count as u64)
    }

    async fn save(&self, mut entity: Entity) -> StoreResult<Entity> {
        let mut state = self.state.write();
        state.validate(entity.id, Some(&entity.entity_type), &entity.relations)?;

        let id = state.assign_ids(&mut entity);
        state.entities.insert(id, entity.clone());
        log::debug!("Memory store saved {}", entity);
        Ok(entity)
    }

    async fn append(&self, id: EntityId, patch: EntityPatch) -> StoreResult<Entity> {
        let mut state = self.state.write();
        state.validate(Some(id), patch.entity_type.as_deref(), &patch.relations)?;

        let mut entity = state
            .entities
            .remove(&id)
            .ok_or(StoreError::NotFound(id))?;
        if let Some(entity_type) = patch.entity_type {
            entity.entity_type = entity_type;
        }
        for attribute in patch.attributes {
            entity.add_attribute(attribute);
        }
        for relation in patch.relations {
            entity.add_relation(relation);
        }

        state.assign_ids(&mut entity);
        state.entities.insert(id, entity.clone());
        log::debug!("Memory store appended to {}", entity);
        Ok(entity)
    }

    async fn delete_by_id(&self, id: EntityId) -> StoreResult<bool> {
        let mut state = self.state.write();
        if !state.entities.contains_key(&id) {
            return Ok(false);
        }

        let referenced = state
            .entities
            .iter()
            .filter(|(source_id, _)| **source_id != id)
            .any(|(_, source)| source.relations.iter().any(|r| r.target_id == id));
        if referenced {
            return Err(StoreError::StillReferenced(id));
        }

        state.entities.remove(&id);
        log::debug!("Memory store deleted entity {}", id);
        Ok(true)
    }
}
