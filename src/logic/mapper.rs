use crate::model::{Attribute, AttributeDto, Entity, EntityDto, Relation, RelationDto};

impl From<&Entity> for EntityDto {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            entity_type: Some(entity.entity_type.clone()),
            attributes: entity.attributes.iter().map(AttributeDto::from).collect(),
            relations: entity.relations.iter().map(RelationDto::from).collect(),
        }
    }
}

impl From<Entity> for EntityDto {
    fn from(entity: Entity) -> Self {
        Self::from(&entity)
    }
}

impl From<&Attribute> for AttributeDto {
    fn from(attribute: &Attribute) -> Self {
        Self {
            id: attribute.id,
            name: attribute.name.clone(),
            value: attribute.value.clone(),
        }
    }
}

impl From<&Relation> for RelationDto {
    fn from(relation: &Relation) -> Self {
        Self {
            id: relation.id,
            relation_type: relation.relation_type.clone(),
            target_id: relation.target_id,
        }
    }
}

pub fn entities_to_dtos(entities: Vec<Entity>) -> Vec<EntityDto> {
    entities.iter().map(EntityDto::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_maps_to_dto_with_target_ids_only() {
        let mut entity = Entity::with_id(1, "Customer".to_string());
        entity.attributes.push(Attribute {
            id: Some(5),
            name: "email".to_string(),
            value: "a@b.com".to_string(),
        });
        entity.relations.push(Relation {
            id: Some(6),
            relation_type: "linked_to".to_string(),
            target_id: 2,
        });

        let dto = EntityDto::from(&entity);
        assert_eq!(dto.id, Some(1));
        assert_eq!(dto.entity_type.as_deref(), Some("Customer"));
        assert_eq!(dto.attributes[0].name, "email");
        assert_eq!(dto.attributes[0].id, Some(5));
        assert_eq!(dto.relations[0].target_id, 2);
        assert_eq!(dto.relations[0].relation_type, "linked_to");
    }
}
