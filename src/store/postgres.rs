use anyhow::Context;
use itertools::Itertools;
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool, Postgres, Row, Transaction};

use crate::error::{StoreError, StoreResult};
use crate::logic::specification::EntitySpecification;
use crate::model::{Attribute, Entity, EntityId, EntityPatch, Relation};
use crate::store::traits::EntityStore;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
// Named in migrations/0001_eav_schema.sql
const TYPE_UNIQUE_CONSTRAINT: &str = "eav_entity_type_key";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Reads take no write locks and see one snapshot across the entity and its collections
    async fn begin_read_only(&self) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code.into_owned())
}

fn is_violation(err: &sqlx::Error, code: &str) -> bool {
    sqlstate(err).as_deref() == Some(code)
}

fn is_duplicate_type(err: &sqlx::Error) -> bool {
    is_violation(err, UNIQUE_VIOLATION)
        && err
            .as_database_error()
            .and_then(|db_err| db_err.constraint())
            == Some(TYPE_UNIQUE_CONSTRAINT)
}

fn entity_write_error(err: sqlx::Error, entity_type: &str) -> StoreError {
    if is_duplicate_type(&err) {
        StoreError::DuplicateType(entity_type.to_string())
    } else {
        err.into()
    }
}

/// Attach attributes and relations to entity heads, one query per collection
async fn load_graphs(
    conn: &mut PgConnection,
    heads: Vec<(EntityId, String)>,
) -> StoreResult<Vec<Entity>> {
    if heads.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<EntityId> = heads.iter().map(|(id, _)| *id).collect();

    let attribute_rows = sqlx::query(
        "SELECT id, entity_id, attribute_name, value FROM eav_attribute_value WHERE entity_id = ANY($1) ORDER BY id",
    )
    .bind(&ids[..])
    .fetch_all(&mut *conn)
    .await?;

    let mut attributes = attribute_rows
        .into_iter()
        .map(|row| {
            let owner: EntityId = row.get("entity_id");
            let attribute = Attribute {
                id: Some(row.get("id")),
                name: row.get("attribute_name"),
                value: row.get("value"),
            };
            (owner, attribute)
        })
        .into_group_map();

    let relation_rows = sqlx::query(
        "SELECT id, source_id, target_id, relation_type FROM eav_relation WHERE source_id = ANY($1) ORDER BY id",
    )
    .bind(&ids[..])
    .fetch_all(&mut *conn)
    .await?;

    let mut relations = relation_rows
        .into_iter()
        .map(|row| {
            let source: EntityId = row.get("source_id");
            let relation = Relation {
                id: Some(row.get("id")),
                relation_type: row.get("relation_type"),
                target_id: row.get("target_id"),
            };
            (source, relation)
        })
        .into_group_map();

    Ok(heads
        .into_iter()
        .map(|(id, entity_type)| Entity {
            id: Some(id),
            entity_type,
            attributes: attributes.remove(&id).unwrap_or_default(),
            relations: relations.remove(&id).unwrap_or_default(),
        })
        .collect())
}

async fn upsert_entity(conn: &mut PgConnection, entity: &Entity) -> StoreResult<EntityId> {
    match entity.id {
        None => {
            let row = sqlx::query("INSERT INTO eav_entity (type) VALUES ($1) RETURNING id")
                .bind(&entity.entity_type)
                .fetch_one(&mut *conn)
                .await
                .map_err(|err| entity_write_error(err, &entity.entity_type))?;
            Ok(row.get("id"))
        }
        Some(id) => {
            rename_entity(conn, id, &entity.entity_type).await?;
            Ok(id)
        }
    }
}

/// Sets the type of a stored entity; a row deleted meanwhile is NotFound, never re-created
async fn rename_entity(conn: &mut PgConnection, id: EntityId, entity_type: &str) -> StoreResult<()> {
    let updated = sqlx::query("UPDATE eav_entity SET type = $2 WHERE id = $1")
        .bind(id)
        .bind(entity_type)
        .execute(&mut *conn)
        .await
        .map_err(|err| entity_write_error(err, entity_type))?;

    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

/// Row lock held until commit, so a concurrent delete waits for this write
async fn lock_entity(conn: &mut PgConnection, id: EntityId) -> StoreResult<String> {
    sqlx::query("SELECT type FROM eav_entity WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.get("type"))
        .ok_or(StoreError::NotFound(id))
}

async fn insert_attribute(
    conn: &mut PgConnection,
    entity_id: EntityId,
    attribute: &Attribute,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO eav_attribute_value (entity_id, attribute_name, value) VALUES ($1, $2, $3)",
    )
    .bind(entity_id)
    .bind(&attribute.name)
    .bind(&attribute.value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_relation(
    conn: &mut PgConnection,
    entity_id: EntityId,
    relation: &Relation,
) -> StoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO eav_relation (source_id, target_id, relation_type) VALUES ($1, $2, $3)",
    )
    .bind(entity_id)
    .bind(relation.target_id)
    .bind(&relation.relation_type)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) if is_violation(&err, FOREIGN_KEY_VIOLATION) => {
            Err(StoreError::MissingTarget(relation.target_id))
        }
        Err(err) => Err(err.into()),
    }
}

async fn sync_attributes(
    conn: &mut PgConnection,
    entity_id: EntityId,
    attributes: &[Attribute],
) -> StoreResult<()> {
    let kept: Vec<i64> = attributes.iter().filter_map(|a| a.id).collect();
    sqlx::query("DELETE FROM eav_attribute_value WHERE entity_id = $1 AND NOT (id = ANY($2))")
        .bind(entity_id)
        .bind(&kept[..])
        .execute(&mut *conn)
        .await?;

    for attribute in attributes {
        match attribute.id {
            Some(id) => {
                sqlx::query(
                    "UPDATE eav_attribute_value SET attribute_name = $2, value = $3 WHERE id = $1 AND entity_id = $4",
                )
                .bind(id)
                .bind(&attribute.name)
                .bind(&attribute.value)
                .bind(entity_id)
                .execute(&mut *conn)
                .await?;
            }
            None => insert_attribute(conn, entity_id, attribute).await?,
        }
    }

    Ok(())
}

async fn sync_relations(
    conn: &mut PgConnection,
    entity_id: EntityId,
    relations: &[Relation],
) -> StoreResult<()> {
    let kept: Vec<i64> = relations.iter().filter_map(|r| r.id).collect();
    sqlx::query("DELETE FROM eav_relation WHERE source_id = $1 AND NOT (id = ANY($2))")
        .bind(entity_id)
        .bind(&kept[..])
        .execute(&mut *conn)
        .await?;

    for relation in relations {
        match relation.id {
            Some(id) => {
                let result = sqlx::query(
                    "UPDATE eav_relation SET relation_type = $2, target_id = $3 WHERE id = $1 AND source_id = $4",
                )
                .bind(id)
                .bind(&relation.relation_type)
                .bind(relation.target_id)
                .bind(entity_id)
                .execute(&mut *conn)
                .await;

                match result {
                    Ok(_) => {}
                    Err(err) if is_violation(&err, FOREIGN_KEY_VIOLATION) => {
                        return Err(StoreError::MissingTarget(relation.target_id));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            None => insert_relation(conn, entity_id, relation).await?,
        }
    }

    Ok(())
}

#[async_trait::async_trait]
impl EntityStore for PostgresStore {
    async fn find_by_id(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        let mut tx = self.begin_read_only().await?;

        let row = sqlx::query("SELECT id, type FROM eav_entity WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let mut graphs = load_graphs(&mut tx, vec![(row.get("id"), row.get("type"))]).await?;
        tx.commit().await?;
        Ok(graphs.pop())
    }

    async fn find_matching(&self, spec: &EntitySpecification) -> StoreResult<Vec<Entity>> {
        let query = spec.to_sql();
        let mut tx = self.begin_read_only().await?;

        let mut select = sqlx::query(&query.sql);
        for value in &query.binds {
            select = select.bind(value);
        }
        let heads: Vec<(EntityId, String)> = select
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|row| (row.get("id"), row.get("type")))
            .collect();

        let entities = if spec.fetch_collections {
            load_graphs(&mut tx, heads).await?
        } else {
            heads
                .into_iter()
                .map(|(id, entity_type)| Entity::with_id(id, entity_type))
                .collect()
        };

        tx.commit().await?;
        log::debug!("Postgres store matched {} entities", entities.len());
        Ok(entities)
    }

    async fn count_matching(&self, spec: &EntitySpecification) -> StoreResult<u64> {
        let query = spec.to_count_sql();
        let mut count = sqlx::query(&query.sql);
        for value in &query.binds {
            count = count.bind(value);
        }

        let row = count.fetch_one(&self.pool).await?;
        let total: i64 = row.get(0);
        Ok(total as u64)
    }

    async fn save(&self, entity: Entity) -> StoreResult<Entity> {
        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        let id = upsert_entity(&mut tx, &entity).await?;
        sync_attributes(&mut tx, id, &entity.attributes).await?;
        sync_relations(&mut tx, id, &entity.relations).await?;

        let saved = load_graphs(&mut tx, vec![(id, entity.entity_type.clone())])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Entity {} vanished during save", id))?;

        tx.commit().await?;
        log::debug!("Postgres store saved {}", saved);
        Ok(saved)
    }

    async fn append(&self, id: EntityId, patch: EntityPatch) -> StoreResult<Entity> {
        let mut tx = self.pool.begin().await?;

        let entity_type = match patch.entity_type {
            Some(entity_type) => {
                rename_entity(&mut tx, id, &entity_type).await?;
                entity_type
            }
            None => lock_entity(&mut tx, id).await?,
        };

        for attribute in &patch.attributes {
            insert_attribute(&mut tx, id, attribute).await?;
        }
        for relation in &patch.relations {
            insert_relation(&mut tx, id, relation).await?;
        }

        let appended = load_graphs(&mut tx, vec![(id, entity_type)])
            .await?
            .pop()
            .ok_or(StoreError::NotFound(id))?;

        tx.commit().await?;
        log::debug!("Postgres store appended to {}", appended);
        Ok(appended)
    }

    async fn delete_by_id(&self, id: EntityId) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Attributes and outgoing relations go with the entity via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM eav_entity WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await;

        let deleted = match result {
            Ok(done) => done.rows_affected() > 0,
            Err(err) if is_violation(&err, FOREIGN_KEY_VIOLATION) => {
                return Err(StoreError::StillReferenced(id));
            }
            Err(err) => return Err(err.into()),
        };

        tx.commit().await?;
        log::debug!("Postgres store deleted entity {}: {}", id, deleted);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityFilter;

    /// Connects to `TEST_DATABASE_URL` when set; these tests are skipped otherwise
    async fn test_store() -> Option<PostgresStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let store = PostgresStore::new(&url, 2).await.ok()?;
        store.migrate().await.ok()?;
        Some(store)
    }

    fn unique_type(prefix: &str) -> String {
        format!("{}-{}", prefix, chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_postgres_save_and_reload_graph() {
        let Some(store) = test_store().await else {
            println!("Skipping: TEST_DATABASE_URL not set");
            return;
        };

        let target = store
            .save(Entity::new(unique_type("PgTarget")))
            .await
            .unwrap();

        let mut entity = Entity::new(unique_type("PgSource"));
        entity.add_attribute(Attribute::new("pg_email".to_string(), "a@b.com".to_string()));
        entity.add_relation(Relation::new("linked_to".to_string(), target.id.unwrap()));
        let saved = store.save(entity).await.unwrap();

        let loaded = store.find_by_id(saved.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(loaded.attributes.len(), 1);
        assert_eq!(loaded.relations[0].target_id, target.id.unwrap());

        let spec = EntitySpecification::from_filter(&EntityFilter::search("PG_EMAIL"));
        let found = store.find_matching(&spec).await.unwrap();
        assert!(found.iter().any(|e| e.id == saved.id));

        assert!(matches!(
            store.delete_by_id(target.id.unwrap()).await,
            Err(StoreError::StillReferenced(_))
        ));
        assert!(store.delete_by_id(saved.id.unwrap()).await.unwrap());
        assert!(store.delete_by_id(target.id.unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_postgres_missing_target_rolls_back() {
        let Some(store) = test_store().await else {
            println!("Skipping: TEST_DATABASE_URL not set");
            return;
        };

        let entity_type = unique_type("PgOrphan");
        let mut entity = Entity::new(entity_type.clone());
        entity.add_relation(Relation::new("linked_to".to_string(), -1));

        let result = store.save(entity).await;
        assert!(matches!(result, Err(StoreError::MissingTarget(-1))));
        assert!(store.find_by_type(&entity_type).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_postgres_overlapping_appends_keep_both_attributes() {
        let Some(store) = test_store().await else {
            println!("Skipping: TEST_DATABASE_URL not set");
            return;
        };

        let id = store
            .save(Entity::new(unique_type("PgAppend")))
            .await
            .unwrap()
            .id
            .unwrap();

        let patch = |name: &str| EntityPatch {
            attributes: vec![Attribute::new(name.to_string(), "v".to_string())],
            ..EntityPatch::default()
        };
        let (first, second) = tokio::join!(store.append(id, patch("x")), store.append(id, patch("y")));
        first.unwrap();
        second.unwrap();

        let stored = store.find_by_id(id).await.unwrap().unwrap();
        let mut names: Vec<&str> = stored.attributes.iter().map(|a| a.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["x", "y"]);

        assert!(store.delete_by_id(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_postgres_writes_to_deleted_entity_are_not_found() {
        let Some(store) = test_store().await else {
            println!("Skipping: TEST_DATABASE_URL not set");
            return;
        };

        let entity_type = unique_type("PgDeleted");
        let id = store
            .save(Entity::new(entity_type.clone()))
            .await
            .unwrap()
            .id
            .unwrap();
        assert!(store.delete_by_id(id).await.unwrap());

        let resave = store.save(Entity::with_id(id, entity_type)).await;
        assert!(matches!(resave, Err(StoreError::NotFound(missing)) if missing == id));

        let appended = store.append(id, EntityPatch::default()).await;
        assert!(matches!(appended, Err(StoreError::NotFound(missing)) if missing == id));

        assert!(store.find_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_postgres_rename_to_taken_type_is_duplicate() {
        let Some(store) = test_store().await else {
            println!("Skipping: TEST_DATABASE_URL not set");
            return;
        };

        let taken = store.save(Entity::new(unique_type("PgTaken"))).await.unwrap();
        let free = store.save(Entity::new(unique_type("PgFree"))).await.unwrap();

        let rename = EntityPatch {
            entity_type: Some(taken.entity_type.clone()),
            ..EntityPatch::default()
        };
        let result = store.append(free.id.unwrap(), rename).await;
        assert!(matches!(result, Err(StoreError::DuplicateType(t)) if t == taken.entity_type));

        assert!(store.delete_by_id(taken.id.unwrap()).await.unwrap());
        assert!(store.delete_by_id(free.id.unwrap()).await.unwrap());
    }
}
