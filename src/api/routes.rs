use axum::{routing::get, Router};

use crate::api::handlers::{self, AppState};
use crate::store::traits::EntityStore;

pub fn create_router<S: EntityStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // API Documentation
        .route("/docs/openapi.json", get(handlers::get_openapi_spec))
        // Entities
        .route(
            "/api/entities",
            get(handlers::list_entities::<S>).post(handlers::create_entity::<S>),
        )
        .route(
            "/api/entities/:id",
            get(handlers::get_entity::<S>)
                .put(handlers::update_entity::<S>)
                .delete(handlers::delete_entity::<S>),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::EntityService;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let service = EntityService::new(Arc::new(MemoryStore::new()));
        create_router().with_state(Arc::new(service))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn types(list: &Value) -> Vec<String> {
        list.as_array()
            .unwrap()
            .iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_create_customer_then_search_by_attribute() {
        let app = app();

        let (status, created) = send(
            &app,
            "POST",
            "/api/entities",
            Some(json!({"type": "Customer", "attributes": [{"name": "email", "value": "a@b.com"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(created["id"].is_i64());
        assert_eq!(created["type"], "Customer");
        assert_eq!(created["attributes"].as_array().unwrap().len(), 1);
        assert!(created["attributes"][0]["id"].is_i64());

        let (status, found) = send(&app, "GET", "/api/entities?search=email", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<i64> = found
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![created["id"].as_i64().unwrap()]);
    }

    #[tokio::test]
    async fn test_list_dispatches_on_type_then_search() {
        let app = app();
        for entity_type in ["Beta", "Alpha", "AlphaBeta"] {
            let (status, _) = send(&app, "POST", "/api/entities", Some(json!({"type": entity_type}))).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, exact) = send(&app, "GET", "/api/entities?type=Alpha&search=beta", None).await;
        assert_eq!(types(&exact), vec!["Alpha"]);

        let (_, searched) = send(&app, "GET", "/api/entities?search=BETA&sortOrder=DESC", None).await;
        assert_eq!(types(&searched), vec!["Beta", "AlphaBeta"]);

        let (_, all) = send(&app, "GET", "/api/entities", None).await;
        assert_eq!(types(&all), vec!["Beta", "Alpha", "AlphaBeta"]);

        let (_, blank) = send(&app, "GET", "/api/entities?search=%20%20", None).await;
        assert_eq!(types(&blank).len(), 3);
    }

    #[tokio::test]
    async fn test_get_missing_entity_is_404() {
        let (status, body) = send(&app(), "GET", "/api/entities/77", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Entity not found, id: 77");
    }

    #[tokio::test]
    async fn test_relation_to_missing_target_is_404_and_nothing_saved() {
        let app = app();
        let (status, _) = send(
            &app,
            "POST",
            "/api/entities",
            Some(json!({"type": "Order", "relations": [{"relationType": "placed_by", "targetId": 123}]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, all) = send(&app, "GET", "/api/entities", None).await;
        assert!(all.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_appends_and_delete_returns_204() {
        let app = app();
        let (_, target) = send(&app, "POST", "/api/entities", Some(json!({"type": "Target"}))).await;
        let (_, entity) = send(
            &app,
            "POST",
            "/api/entities",
            Some(json!({"type": "E", "attributes": [{"name": "A", "value": "1"}]})),
        )
        .await;
        let id = entity["id"].as_i64().unwrap();
        let target_id = target["id"].as_i64().unwrap();

        let (status, updated) = send(
            &app,
            "PUT",
            &format!("/api/entities/{}", id),
            Some(json!({"relations": [{"relationType": "linked_to", "targetId": target_id}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["type"], "E");
        assert_eq!(updated["attributes"][0]["name"], "A");
        assert_eq!(updated["relations"][0]["targetId"], target_id);

        // Still referenced by E
        let (status, _) = send(&app, "DELETE", &format!("/api/entities/{}", target_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "DELETE", &format!("/api/entities/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = send(&app, "GET", &format!("/api/entities/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_type_is_409_and_missing_type_is_400() {
        let app = app();
        send(&app, "POST", "/api/entities", Some(json!({"type": "Customer"}))).await;

        let (status, _) = send(&app, "POST", "/api/entities", Some(json!({"type": "Customer"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "POST", "/api/entities", Some(json!({"attributes": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_openapi() {
        let app = app();
        let (status, health) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "healthy");

        let (status, spec) = send(&app, "GET", "/docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(spec["paths"]["/api/entities/{id}"]["delete"].is_object());
    }
}
