//! Runtime-built query specifications over entities.
//!
//! A specification is a predicate tree over a small typed field set plus an
//! ordering clause. The same tree is evaluated in memory by `Predicate::matches`
//! and rendered to parameterised SQL by `EntitySpecification::to_sql`, so both
//! store backends agree on what a filter means.

use crate::model::{Entity, EntityFilter, SortOrder};

pub const ENTITY_TABLE: &str = "eav_entity";
pub const ATTRIBUTE_TABLE: &str = "eav_attribute_value";
pub const RELATION_TABLE: &str = "eav_relation";

/// Fields a predicate can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The entity's own `type` column
    EntityType,
    /// Name of any owned attribute, reached through a LEFT JOIN
    AttributeName,
}

impl Field {
    fn column(&self) -> &'static str {
        match self {
            Field::EntityType => "e.type",
            Field::AttributeName => "a.attribute_name",
        }
    }

    fn values<'a>(&self, entity: &'a Entity) -> Vec<&'a str> {
        match self {
            Field::EntityType => vec![entity.entity_type.as_str()],
            Field::AttributeName => entity.attributes.iter().map(|a| a.name.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Always,
    Equals { field: Field, value: String },
    ContainsIgnoreCase { field: Field, needle: String },
    Any(Vec<Predicate>),
    All(Vec<Predicate>),
}

/// Case-insensitive substring match on the entity type
pub fn type_contains(search: &str) -> Predicate {
    Predicate::ContainsIgnoreCase {
        field: Field::EntityType,
        needle: search.to_lowercase(),
    }
}

/// Case-insensitive substring match on the name of any owned attribute
pub fn attribute_name_contains(search: &str) -> Predicate {
    Predicate::ContainsIgnoreCase {
        field: Field::AttributeName,
        needle: search.to_lowercase(),
    }
}

/// Exact, case-sensitive match on the entity type
pub fn type_equals(entity_type: &str) -> Predicate {
    Predicate::Equals {
        field: Field::EntityType,
        value: entity_type.to_string(),
    }
}

impl Predicate {
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Always, _) | (_, Predicate::Always) => Predicate::Always,
            (Predicate::Any(mut left), Predicate::Any(right)) => {
                left.extend(right);
                Predicate::Any(left)
            }
            (Predicate::Any(mut left), right) => {
                left.push(right);
                Predicate::Any(left)
            }
            (left, right) => Predicate::Any(vec![left, right]),
        }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Always, p) | (p, Predicate::Always) => p,
            (Predicate::All(mut left), Predicate::All(right)) => {
                left.extend(right);
                Predicate::All(left)
            }
            (Predicate::All(mut left), right) => {
                left.push(right);
                Predicate::All(left)
            }
            (left, right) => Predicate::All(vec![left, right]),
        }
    }

    /// Evaluates the predicate against a loaded entity graph. Joined fields
    /// match when any of their values match.
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Equals { field, value } => {
                field.values(entity).into_iter().any(|v| v == value)
            }
            Predicate::ContainsIgnoreCase { field, needle } => field
                .values(entity)
                .into_iter()
                .any(|v| v.to_lowercase().contains(needle.as_str())),
            Predicate::Any(parts) => parts.iter().any(|p| p.matches(entity)),
            Predicate::All(parts) => parts.iter().all(|p| p.matches(entity)),
        }
    }

    pub fn references(&self, target: Field) -> bool {
        match self {
            Predicate::Always => false,
            Predicate::Equals { field, .. } | Predicate::ContainsIgnoreCase { field, .. } => {
                *field == target
            }
            Predicate::Any(parts) | Predicate::All(parts) => {
                parts.iter().any(|p| p.references(target))
            }
        }
    }

    fn needs_join(&self) -> bool {
        self.references(Field::AttributeName)
    }

    fn render(&self, binds: &mut Vec<String>) -> String {
        match self {
            Predicate::Always => "TRUE".to_string(),
            Predicate::Equals { field, value } => {
                binds.push(value.clone());
                format!("{} = ${}", field.column(), binds.len())
            }
            Predicate::ContainsIgnoreCase { field, needle } => {
                binds.push(format!("%{}%", escape_like(needle)));
                format!("LOWER({}) LIKE ${} ESCAPE '\\'", field.column(), binds.len())
            }
            Predicate::Any(parts) if parts.is_empty() => "FALSE".to_string(),
            Predicate::All(parts) if parts.is_empty() => "TRUE".to_string(),
            Predicate::Any(parts) => join_rendered(parts, " OR ", binds),
            Predicate::All(parts) => join_rendered(parts, " AND ", binds),
        }
    }
}

fn join_rendered(parts: &[Predicate], separator: &str, binds: &mut Vec<String>) -> String {
    let rendered: Vec<String> = parts.iter().map(|p| p.render(binds)).collect();
    format!("({})", rendered.join(separator))
}

/// Search terms are literals, so LIKE wildcards in them must not leak through
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Ordering by entity type. There is no secondary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub direction: SortOrder,
}

/// SQL text with positional `$n` placeholders and their bind values in order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub binds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpecification {
    pub predicate: Predicate,
    pub order: Option<Order>,
    pub distinct: bool,
    /// Load attributes and relations with the result. Off for count queries.
    pub fetch_collections: bool,
}

impl EntitySpecification {
    pub fn all() -> Self {
        Self {
            predicate: Predicate::Always,
            order: None,
            distinct: true,
            fetch_collections: true,
        }
    }

    pub fn by_type(entity_type: &str) -> Self {
        Self {
            predicate: type_equals(entity_type),
            ..Self::all()
        }
    }

    /// Builds the free-text specification: type OR attribute name, ordered by type
    pub fn from_filter(filter: &EntityFilter) -> Self {
        let predicate = match filter.search_term() {
            Some(search) => type_contains(search).or(attribute_name_contains(search)),
            None => Predicate::Always,
        };

        Self {
            predicate,
            order: Some(Order {
                direction: filter.sort_order,
            }),
            distinct: true,
            fetch_collections: true,
        }
    }

    /// Same predicate, shaped for counting
    pub fn for_count(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            order: None,
            distinct: true,
            fetch_collections: false,
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.predicate.matches(entity)
    }

    /// Orders entities in memory the same way `to_sql` orders rows
    pub fn sort(&self, entities: &mut [Entity]) {
        match self.order {
            Some(Order { direction }) => entities.sort_by(|a, b| {
                let ordering = a.entity_type.cmp(&b.entity_type);
                match direction {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            }),
            None => entities.sort_by_key(|e| e.id),
        }
    }

    /// Renders the query that selects matching entity rows
    pub fn to_sql(&self) -> SqlQuery {
        let mut binds = Vec::new();
        let where_clause = self.predicate.render(&mut binds);
        let select = if self.distinct { "SELECT DISTINCT" } else { "SELECT" };
        let order_by = match self.order {
            Some(order) => format!("{} {}", Field::EntityType.column(), order.direction.as_sql()),
            None => "e.id".to_string(),
        };

        SqlQuery {
            sql: format!(
                "{} e.id, e.type FROM {}{} WHERE {} ORDER BY {}",
                select,
                ENTITY_TABLE,
                self.join_clause(),
                where_clause,
                order_by
            ),
            binds,
        }
    }

    /// Renders the query that counts matching entities
    pub fn to_count_sql(&self) -> SqlQuery {
        let mut binds = Vec::new();
        let where_clause = self.predicate.render(&mut binds);
        let count = if self.distinct { "COUNT(DISTINCT e.id)" } else { "COUNT(e.id)" };

        SqlQuery {
            sql: format!(
                "SELECT {} FROM {}{} WHERE {}",
                count,
                ENTITY_TABLE,
                self.join_clause(),
                where_clause
            ),
            binds,
        }
    }

    fn join_clause(&self) -> String {
        if self.predicate.needs_join() {
            format!(" e LEFT JOIN {} a ON a.entity_id = e.id", ATTRIBUTE_TABLE)
        } else {
            " e".to_string()
        }
    }
}
