use anyhow::Result;

use crate::logic::EntityService;
use crate::model::EntityDto;
use crate::store::traits::EntityStore;

pub const RELATED_ENTITY_TYPE: &str = "RelatedEntity";
pub const MAIN_ENTITY_TYPE: &str = "MainEntity";

/// Populate an empty store with a small demonstration graph.
///
/// Does nothing when the store already holds entities, so it is safe to run
/// on every startup.
pub async fn load_seed_data<S: EntityStore>(service: &EntityService<S>) -> Result<bool> {
    let existing = service.store().count().await?;
    if existing > 0 {
        log::info!("Skipping seed data, store already holds {} entities", existing);
        return Ok(false);
    }

    let related = service.save(EntityDto::new(RELATED_ENTITY_TYPE)).await?;
    let related_id = related
        .id
        .ok_or_else(|| anyhow::anyhow!("seeded {} has no id", RELATED_ENTITY_TYPE))?;

    let main = EntityDto::new(MAIN_ENTITY_TYPE)
        .attribute("title", "Main attribute value")
        .relation("linked_to", related_id);
    service.save(main).await?;

    log::info!(
        "Seeded {} and {} linked to entity {}",
        MAIN_ENTITY_TYPE,
        RELATED_ENTITY_TYPE,
        related_id
    );
    Ok(true)
}
