use std::fmt;
use std::hash::{Hash, Hasher};

/// Surrogate key assigned by the store on first save
pub type EntityId = i64;

/// A typed node in the graph. Owns its attributes and its outgoing relations.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    pub id: Option<EntityId>,
    pub entity_type: String, // Unique across all entities
    pub attributes: Vec<Attribute>,
    pub relations: Vec<Relation>, // This entity is always the source
}

impl Entity {
    pub fn new(entity_type: String) -> Self {
        Self {
            id: None,
            entity_type,
            attributes: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_id(id: EntityId, entity_type: String) -> Self {
        Self {
            id: Some(id),
            ..Self::new(entity_type)
        }
    }

    /// Adds an attribute unless an equal one is already owned.
    /// Returns true when the collection changed.
    pub fn add_attribute(&mut self, attribute: Attribute) -> bool {
        if self.attributes.contains(&attribute) {
            return false;
        }
        self.attributes.push(attribute);
        true
    }

    /// Adds a relation unless an equal one to the same target is already owned.
    /// Returns true when the collection changed.
    pub fn add_relation(&mut self, relation: Relation) -> bool {
        let duplicate = self
            .relations
            .iter()
            .any(|existing| *existing == relation && existing.target_id == relation.target_id);
        if duplicate {
            return false;
        }
        self.relations.push(relation);
        true
    }
}

/// Additions to an already stored entity. Applied by the store in one step,
/// so nothing stored is rewritten or removed.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub entity_type: Option<String>, // Overwrites the type when set
    pub attributes: Vec<Attribute>,
    pub relations: Vec<Relation>,
}

// Identity fields only; the collections are not part of equality
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.entity_type == other.entity_type
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.entity_type.hash(state);
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity{{id={}, type='{}'}}", DisplayId(self.id), self.entity_type)
    }
}

/// A named value owned by exactly one entity
#[derive(Debug, Clone)]
pub struct Attribute {
    pub id: Option<i64>,
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: String, value: String) -> Self {
        Self {
            id: None,
            name,
            value,
        }
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name && self.value == other.value
    }
}

impl Eq for Attribute {}

impl Hash for Attribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.name.hash(state);
        self.value.hash(state);
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Attribute{{id={}, name='{}', value='{}'}}",
            DisplayId(self.id),
            self.name,
            self.value
        )
    }
}

/// A typed directed edge from the owning entity to `target_id`
#[derive(Debug, Clone)]
pub struct Relation {
    pub id: Option<i64>,
    pub relation_type: String, // e.g. "linked_to"
    pub target_id: EntityId,   // Non-owning, resolved by id lookup
}

impl Relation {
    pub fn new(relation_type: String, target_id: EntityId) -> Self {
        Self {
            id: None,
            relation_type,
            target_id,
        }
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.relation_type == other.relation_type
    }
}

impl Eq for Relation {}

impl Hash for Relation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.relation_type.hash(state);
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Relation{{id={}, relationType='{}'}}",
            DisplayId(self.id),
            self.relation_type
        )
    }
}

struct DisplayId(Option<i64>);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{}", id),
            None => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_attribute_equality_covers_id_name_and_value() {
        let a = Attribute {
            id: Some(1),
            name: "email".to_string(),
            value: "a@b.com".to_string(),
        };
        let mut b = a.clone();
        assert_eq!(a, b);

        b.value = "c@d.com".to_string();
        assert_ne!(a, b);
    }

    #[test]
    fn test_add_attribute_keeps_unique_membership() {
        let mut entity = Entity::new("Customer".to_string());
        assert!(entity.add_attribute(Attribute::new("email".to_string(), "a@b.com".to_string())));
        assert!(!entity.add_attribute(Attribute::new("email".to_string(), "a@b.com".to_string())));
        assert!(entity.add_attribute(Attribute::new("email".to_string(), "x@y.com".to_string())));
        assert_eq!(entity.attributes.len(), 2);
    }

    #[test]
    fn test_add_relation_distinguishes_targets() {
        let mut entity = Entity::new("Order".to_string());
        assert!(entity.add_relation(Relation::new("belongs_to".to_string(), 1)));
        assert!(!entity.add_relation(Relation::new("belongs_to".to_string(), 1)));
        assert!(entity.add_relation(Relation::new("belongs_to".to_string(), 2)));
        assert_eq!(entity.relations.len(), 2);
    }

    #[test]
    fn test_relation_equality_is_id_and_type() {
        let a = Relation {
            id: Some(7),
            relation_type: "linked_to".to_string(),
            target_id: 1,
        };
        let b = Relation {
            target_id: 2,
            ..a.clone()
        };
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_entity_equality_ignores_collections() {
        let mut a = Entity::with_id(3, "Customer".to_string());
        let b = a.clone();
        a.add_attribute(Attribute::new("phone".to_string(), "123".to_string()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_display_renders_identity_only() {
        let mut entity = Entity::new("Customer".to_string());
        entity.add_attribute(Attribute::new("email".to_string(), "a@b.com".to_string()));
        assert_eq!(entity.to_string(), "Entity{id=null, type='Customer'}");

        let relation = Relation {
            id: Some(4),
            relation_type: "linked_to".to_string(),
            target_id: 9,
        };
        assert_eq!(relation.to_string(), "Relation{id=4, relationType='linked_to'}");
    }
}
