pub mod entitlement;

use actix_web::web;

/// Registers the entitlement routes. The trial overrides are only mounted
/// when debug commands are enabled.
pub fn configure(cfg: &mut web::ServiceConfig, debug_commands: bool) {
    cfg.service(entitlement::get_entitlement)
        .service(entitlement::get_access)
        .service(entitlement::list_products)
        .service(entitlement::purchase)
        .service(entitlement::restore)
        .service(entitlement::refresh);

    if debug_commands {
        cfg.service(entitlement::expire_trial)
            .service(entitlement::reset_trial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};

    use async_trait::async_trait;

    use crate::config::EntitlementConfig;
    use crate::error::EntitlementError;
    use crate::models::common::MONTHLY_PRODUCT_ID;
    use crate::models::product::{ProductDescriptor, PurchaseReceipt};
    use crate::services::backend::{MockPurchaseBackend, PurchaseBackend};
    use crate::services::entitlement::EntitlementStore;
    use crate::services::storage;

    /// A backend that is never reachable.
    struct OfflineBackend;

    fn offline() -> EntitlementError {
        EntitlementError::BackendUnavailable("connection refused".to_string())
    }

    #[async_trait]
    impl PurchaseBackend for OfflineBackend {
        async fn connect(&self) -> Result<(), EntitlementError> {
            Err(offline())
        }

        async fn disconnect(&self) {}

        async fn list_products(&self, _product_ids: &[String]) -> Result<Vec<ProductDescriptor>, EntitlementError> {
            Err(offline())
        }

        async fn purchase(&self, _product_id: &str) -> Result<PurchaseReceipt, EntitlementError> {
            Err(offline())
        }

        async fn list_owned_purchases(&self) -> Result<Vec<PurchaseReceipt>, EntitlementError> {
            Err(offline())
        }
    }

    async fn store_backed_by(backend: Arc<dyn PurchaseBackend>) -> web::Data<EntitlementStore> {
        let store = EntitlementStore::initialize(
            storage::open("memory://").await.unwrap(),
            backend,
            EntitlementConfig::default(),
        )
        .await;
        web::Data::new(store)
    }

    async fn test_store() -> web::Data<EntitlementStore> {
        store_backed_by(Arc::new(MockPurchaseBackend::new())).await
    }

    #[actix_web::test]
    async fn test_entitlement_starts_in_trial() {
        let app = test::init_service(
            App::new()
                .app_data(test_store().await)
                .service(web::scope("/api/v1").configure(|cfg| configure(cfg, false))),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/entitlement").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["has_access"], true);
        assert_eq!(body["data"]["is_premium"], false);
        assert_eq!(body["data"]["days_remaining"], 7);
        assert_eq!(body["data"]["access"]["kind"], "trial");
        assert_eq!(body["data"]["access"]["daysRemaining"], 7);
    }

    #[actix_web::test]
    async fn test_products_fall_back_to_static_catalog() {
        let app = test::init_service(
            App::new()
                .app_data(test_store().await)
                .service(web::scope("/api/v1").configure(|cfg| configure(cfg, false))),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/products").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        let products = body["data"].as_array().unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0]["displayPrice"], "$4.99");
    }

    #[actix_web::test]
    async fn test_purchase_and_validation() {
        let app = test::init_service(
            App::new()
                .app_data(test_store().await)
                .service(web::scope("/api/v1").configure(|cfg| configure(cfg, false))),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/entitlement/purchase")
            .set_json(json!({ "productId": "" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/entitlement/purchase")
            .set_json(json!({ "productId": "com.example.unknown" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/entitlement/purchase")
            .set_json(json!({ "productId": MONTHLY_PRODUCT_ID }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["is_premium"], true);
        assert_eq!(body["data"]["access"]["kind"], "premium");
    }

    #[actix_web::test]
    async fn test_debug_routes_require_flag() {
        let app = test::init_service(
            App::new()
                .app_data(test_store().await)
                .service(web::scope("/api/v1").configure(|cfg| configure(cfg, false))),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/debug/expire-trial").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_debug_trial_overrides() {
        let app = test::init_service(
            App::new()
                .app_data(test_store().await)
                .service(web::scope("/api/v1").configure(|cfg| configure(cfg, true))),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/debug/expire-trial").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["is_trial_expired"], true);
        assert_eq!(body["data"]["has_access"], false);
        assert_eq!(body["data"]["access"]["kind"], "locked");

        let req = test::TestRequest::post()
            .uri("/api/v1/debug/reset-trial")
            .set_json(json!({ "days": 3 }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["days_remaining"], 3);

        let req = test::TestRequest::post()
            .uri("/api/v1/debug/reset-trial")
            .set_json(json!({ "days": 0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_restore_with_nothing_owned() {
        let app = test::init_service(
            App::new()
                .app_data(test_store().await)
                .service(web::scope("/api/v1").configure(|cfg| configure(cfg, false))),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/entitlement/restore").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "No previous purchases found");
        assert_eq!(body["data"]["is_premium"], false);
    }

    #[actix_web::test]
    async fn test_unreachable_backend_is_service_unavailable() {
        let app = test::init_service(
            App::new()
                .app_data(store_backed_by(Arc::new(OfflineBackend)).await)
                .service(web::scope("/api/v1").configure(|cfg| configure(cfg, false))),
        )
        .await;

        for uri in ["/api/v1/entitlement/refresh", "/api/v1/entitlement/restore"] {
            let req = test::TestRequest::post().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["success"], false);
            assert_eq!(body["error"], "The store is not reachable right now. Please try again later.");
        }

        let req = test::TestRequest::post()
            .uri("/api/v1/entitlement/purchase")
            .set_json(json!({ "productId": MONTHLY_PRODUCT_ID }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        // the trial is still served
        let req = test::TestRequest::get().uri("/api/v1/entitlement").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["has_access"], true);
        assert_eq!(body["data"]["is_premium"], false);
    }
}
