use thiserror::Error;

use crate::model::EntityId;

/// Failures raised by an `EntityStore` backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entity {0} does not exist")]
    NotFound(EntityId),

    #[error("Entity type '{0}' already exists")]
    DuplicateType(String),

    #[error("Relation target entity {0} does not exist")]
    MissingTarget(EntityId),

    #[error("Entity {0} is still the target of relations from other entities")]
    StillReferenced(EntityId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced by the entity service to its callers
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("Entity not found, id: {0}")]
    NotFound(EntityId),

    #[error("Invalid entity: {0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),
}

pub type EntityResult<T> = Result<T, EntityError>;

impl From<StoreError> for EntityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) | StoreError::MissingTarget(id) => EntityError::NotFound(id),
            StoreError::DuplicateType(_) | StoreError::StillReferenced(_) => {
                EntityError::Conflict(err.to_string())
            }
            other => EntityError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_translate_to_service_errors() {
        assert!(matches!(
            EntityError::from(StoreError::MissingTarget(4)),
            EntityError::NotFound(4)
        ));
        assert!(matches!(
            EntityError::from(StoreError::NotFound(9)),
            EntityError::NotFound(9)
        ));

        let conflict = EntityError::from(StoreError::DuplicateType("Customer".to_string()));
        assert_eq!(conflict.to_string(), "Entity type 'Customer' already exists");

        assert!(matches!(
            EntityError::from(StoreError::Other(anyhow::anyhow!("boom"))),
            EntityError::Store(_)
        ));
    }
}
