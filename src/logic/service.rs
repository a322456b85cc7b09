use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{EntityError, EntityResult};
use crate::logic::mapper::entities_to_dtos;
use crate::logic::specification::EntitySpecification;
use crate::model::{Attribute, Entity, EntityDto, EntityFilter, EntityId, EntityPatch, Relation};
use crate::store::traits::EntityStore;

/// Translates DTOs into entity graphs and back, and owns the NotFound policy.
///
/// Every mutation ends in exactly one `EntityStore::save`, `append` or
/// `delete_by_id` call, which the store runs as a single transaction. Relation targets are
/// resolved before that call, so a missing target aborts before anything is
/// written.
pub struct EntityService<S: EntityStore> {
    store: Arc<S>,
}

impl<S: EntityStore> EntityService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn find_by_id(&self, id: EntityId) -> EntityResult<EntityDto> {
        log::debug!("Loading entity {}", id);
        let entity = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(EntityError::NotFound(id))?;
        Ok(EntityDto::from(entity))
    }

    pub async fn find_by_type(&self, entity_type: &str) -> EntityResult<Vec<EntityDto>> {
        if entity_type.is_empty() {
            return Ok(Vec::new());
        }
        log::debug!("Loading entities of type '{}'", entity_type);
        let entities = self.store.find_by_type(entity_type).await?;
        Ok(entities_to_dtos(entities))
    }

    pub async fn find_all(&self) -> EntityResult<Vec<EntityDto>> {
        let entities = self.store.find_all().await?;
        Ok(entities_to_dtos(entities))
    }

    pub async fn find_all_filtered(&self, filter: &EntityFilter) -> EntityResult<Vec<EntityDto>> {
        log::debug!(
            "Filtering entities: search={:?} sort={}",
            filter.search,
            filter.sort_order
        );
        let spec = EntitySpecification::from_filter(filter);
        let entities = self.store.find_matching(&spec).await?;
        Ok(entities_to_dtos(entities))
    }

    pub async fn save(&self, dto: EntityDto) -> EntityResult<EntityDto> {
        let entity_type = match dto.entity_type.as_deref() {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => return Err(EntityError::Validation("type is required".to_string())),
        };
        validate_children(&dto)?;

        let mut entity = Entity::new(entity_type);
        self.add_attributes_and_relations(&mut entity, &dto).await?;

        let saved = self.store.save(entity).await?;
        log::info!(
            "Created {} with {} attributes and {} relations",
            saved,
            saved.attributes.len(),
            saved.relations.len()
        );
        Ok(EntityDto::from(saved))
    }

    /// Overwrites the type when given and appends the listed attributes and
    /// relations. Nothing already stored is removed or replaced.
    pub async fn update(&self, id: EntityId, dto: EntityDto) -> EntityResult<EntityDto> {
        if let Some(t) = dto.entity_type.as_deref() {
            if t.trim().is_empty() {
                return Err(EntityError::Validation("type must not be blank".to_string()));
            }
        }
        validate_children(&dto)?;

        // Collected on a scratch entity for the same dedupe rules as create
        let mut additions = Entity::with_id(id, String::new());
        self.add_attributes_and_relations(&mut additions, &dto).await?;

        let patch = EntityPatch {
            entity_type: dto.entity_type,
            attributes: additions.attributes,
            relations: additions.relations,
        };
        let updated = self.store.append(id, patch).await?;
        log::info!("Updated {}", updated);
        Ok(EntityDto::from(updated))
    }

    pub async fn delete_entity(&self, id: EntityId) -> EntityResult<()> {
        let deleted = self.store.delete_by_id(id).await?;
        if deleted {
            log::info!("Deleted entity {}", id);
        } else {
            log::debug!("Delete of entity {} found nothing", id);
        }
        Ok(())
    }

    async fn add_attributes_and_relations(
        &self,
        entity: &mut Entity,
        dto: &EntityDto,
    ) -> EntityResult<()> {
        for attribute in &dto.attributes {
            entity.add_attribute(Attribute::new(
                attribute.name.clone(),
                attribute.value.clone(),
            ));
        }

        let mut resolved: HashSet<EntityId> = HashSet::new();
        for relation in &dto.relations {
            let target_id = relation.target_id;
            let is_self = entity.id == Some(target_id);
            if !is_self && !resolved.contains(&target_id) {
                self.store
                    .find_by_id(target_id)
                    .await?
                    .ok_or(EntityError::NotFound(target_id))?;
                resolved.insert(target_id);
            }
            entity.add_relation(Relation::new(relation.relation_type.clone(), target_id));
        }

        Ok(())
    }
}

fn validate_children(dto: &EntityDto) -> EntityResult<()> {
    if dto.attributes.iter().any(|a| a.name.trim().is_empty()) {
        return Err(EntityError::Validation(
            "attribute name must not be blank".to_string(),
        ));
    }
    if dto.relations.iter().any(|r| r.relation_type.trim().is_empty()) {
        return Err(EntityError::Validation(
            "relationType must not be blank".to_string(),
        ));
    }
    Ok(())
}
