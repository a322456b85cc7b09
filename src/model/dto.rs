use serde::{Deserialize, Serialize};

use crate::model::EntityId;

/// Wire shape of an entity. On input every field is optional: `type` is
/// required by create but may be omitted by a partial update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDto {
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(rename = "type", default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDto>,
    #[serde(default)]
    pub relations: Vec<RelationDto>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDto {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(alias = "attributeName")]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Relations expose only the target id so that nesting stays bounded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDto {
    #[serde(default)]
    pub id: Option<i64>,
    pub relation_type: String,
    pub target_id: EntityId,
}

impl EntityDto {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            ..Self::default()
        }
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push(AttributeDto {
            id: None,
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn relation(mut self, relation_type: &str, target_id: EntityId) -> Self {
        self.relations.push(RelationDto {
            id: None,
            relation_type: relation_type.to_string(),
            target_id,
        });
        self
    }
}
