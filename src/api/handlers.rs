use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::EntityError;
use crate::logic::EntityService;
use crate::model::{EntityDto, EntityFilter, EntityId, SortOrder};
use crate::store::traits::EntityStore;

pub type AppState<S> = Arc<EntityService<S>>;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

/// Query parameters accepted by `GET /api/entities`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityQuery {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub search: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl EntityQuery {
    fn filter(&self) -> EntityFilter {
        EntityFilter {
            search: self.search.clone(),
            sort_order: self.sort_order.unwrap_or_default(),
        }
    }
}

fn api_error(err: EntityError) -> ApiError {
    let status = match &err {
        EntityError::NotFound(_) => StatusCode::NOT_FOUND,
        EntityError::Validation(_) => StatusCode::BAD_REQUEST,
        EntityError::Conflict(_) => StatusCode::CONFLICT,
        EntityError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        log::error!("Request failed: {}", err);
    }
    (status, Json(ErrorResponse::new(&err.to_string())))
}

pub async fn create_entity<S: EntityStore>(
    State(service): State<AppState<S>>,
    RequestJson(dto): RequestJson<EntityDto>,
) -> Result<Json<EntityDto>, ApiError> {
    let created = service.save(dto).await.map_err(api_error)?;
    Ok(Json(created))
}

pub async fn get_entity<S: EntityStore>(
    State(service): State<AppState<S>>,
    Path(id): Path<EntityId>,
) -> Result<Json<EntityDto>, ApiError> {
    let entity = service.find_by_id(id).await.map_err(api_error)?;
    Ok(Json(entity))
}

/// `type` wins over `search`; with neither, every entity is returned
pub async fn list_entities<S: EntityStore>(
    State(service): State<AppState<S>>,
    Query(query): Query<EntityQuery>,
) -> Result<Json<Vec<EntityDto>>, ApiError> {
    let filter = query.filter();

    let entities = match query.entity_type.as_deref() {
        Some(entity_type) if !entity_type.is_empty() => service.find_by_type(entity_type).await,
        _ if filter.search_term().is_some() => service.find_all_filtered(&filter).await,
        _ => service.find_all().await,
    }
    .map_err(api_error)?;

    Ok(Json(entities))
}

pub async fn update_entity<S: EntityStore>(
    State(service): State<AppState<S>>,
    Path(id): Path<EntityId>,
    RequestJson(dto): RequestJson<EntityDto>,
) -> Result<Json<EntityDto>, ApiError> {
    let updated = service.update(id, dto).await.map_err(api_error)?;
    Ok(Json(updated))
}

pub async fn delete_entity<S: EntityStore>(
    State(service): State<AppState<S>>,
    Path(id): Path<EntityId>,
) -> Result<StatusCode, ApiError> {
    service.delete_entity(id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_openapi_spec() -> Json<serde_json::Value> {
    let entity_ref = serde_json::json!({ "$ref": "#/components/schemas/EntityDto" });
    let error_response = serde_json::json!({
        "description": "Error",
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            }
        }
    });
    let id_param = serde_json::json!({
        "name": "id",
        "in": "path",
        "required": true,
        "schema": { "type": "integer", "format": "int64" }
    });

    let spec = serde_json::json!({
        "openapi": "3.0.3",
        "info": {
            "title": "EAV Store API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Entities with dynamic attributes and typed relations"
        },
        "servers": [{ "url": "/", "description": "Current server" }],
        "paths": {
            "/health": {
                "get": {
                    "summary": "Health check",
                    "responses": { "200": { "description": "Service is healthy" } }
                }
            },
            "/api/entities": {
                "get": {
                    "summary": "List entities",
                    "description": "Exact match on `type` when given, otherwise a case-insensitive search over type and attribute names when `search` is given, otherwise all entities.",
                    "parameters": [
                        { "name": "type", "in": "query", "schema": { "type": "string" } },
                        { "name": "search", "in": "query", "schema": { "type": "string" } },
                        { "name": "sortOrder", "in": "query", "schema": { "type": "string", "enum": ["ASC", "DESC"], "default": "ASC" } }
                    ],
                    "responses": {
                        "200": {
                            "description": "Matching entities",
                            "content": { "application/json": { "schema": { "type": "array", "items": entity_ref } } }
                        }
                    }
                },
                "post": {
                    "summary": "Create an entity with its attributes and relations",
                    "requestBody": { "required": true, "content": { "application/json": { "schema": entity_ref } } },
                    "responses": {
                        "200": { "description": "Created entity", "content": { "application/json": { "schema": entity_ref } } },
                        "400": error_response,
                        "404": error_response,
                        "409": error_response
                    }
                }
            },
            "/api/entities/{id}": {
                "get": {
                    "summary": "Get an entity by id",
                    "parameters": [id_param],
                    "responses": {
                        "200": { "description": "Entity", "content": { "application/json": { "schema": entity_ref } } },
                        "404": error_response
                    }
                },
                "put": {
                    "summary": "Update type and append attributes and relations",
                    "parameters": [id_param],
                    "requestBody": { "required": true, "content": { "application/json": { "schema": entity_ref } } },
                    "responses": {
                        "200": { "description": "Updated entity", "content": { "application/json": { "schema": entity_ref } } },
                        "400": error_response,
                        "404": error_response,
                        "409": error_response
                    }
                },
                "delete": {
                    "summary": "Delete an entity with its attributes and outgoing relations",
                    "parameters": [id_param],
                    "responses": {
                        "204": { "description": "Deleted" },
                        "409": error_response
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "EntityDto": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer", "format": "int64", "readOnly": true },
                        "type": { "type": "string" },
                        "attributes": { "type": "array", "items": { "$ref": "#/components/schemas/AttributeDto" } },
                        "relations": { "type": "array", "items": { "$ref": "#/components/schemas/RelationDto" } }
                    }
                },
                "AttributeDto": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "id": { "type": "integer", "format": "int64", "readOnly": true },
                        "name": { "type": "string" },
                        "value": { "type": "string" }
                    }
                },
                "RelationDto": {
                    "type": "object",
                    "required": ["relationType", "targetId"],
                    "properties": {
                        "id": { "type": "integer", "format": "int64", "readOnly": true },
                        "relationType": { "type": "string" },
                        "targetId": { "type": "integer", "format": "int64" }
                    }
                },
                "ErrorResponse": {
                    "type": "object",
                    "properties": { "error": { "type": "string" } }
                }
            }
        }
    });

    Json(spec)
}
