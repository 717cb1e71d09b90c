use actix_web::{get, post, HttpResponse, Result};
use actix_web::web::{Data, Json};
use serde::Deserialize;
use validator::Validate;

use crate::error::EntitlementError;
use crate::models::common::ApiResponse;
use crate::services::entitlement::EntitlementStore;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    #[validate(length(min = 1, message = "Select a subscription plan"))]
    pub product_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetTrialRequest {
    #[validate(range(min = 1, max = 365, message = "Trial length must be between 1 and 365 days"))]
    pub days: Option<i64>,
}

fn error_response(e: &EntitlementError) -> HttpResponse {
    let body = ApiResponse::<()>::error(e.user_message().to_string());
    match e {
        EntitlementError::InvalidProduct(_) | EntitlementError::InvalidTrialLength(_) => {
            HttpResponse::BadRequest().json(body)
        }
        _ => HttpResponse::ServiceUnavailable().json(body),
    }
}

#[get("/entitlement")]
pub async fn get_entitlement(store: Data<EntitlementStore>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiResponse::success(store.view())))
}

#[get("/entitlement/access")]
pub async fn get_access(store: Data<EntitlementStore>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiResponse::success(store.access_decision())))
}

#[get("/products")]
pub async fn list_products(store: Data<EntitlementStore>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiResponse::success(store.products().await)))
}

#[post("/entitlement/purchase")]
pub async fn purchase(
    store: Data<EntitlementStore>,
    payload: Json<PurchaseRequest>,
) -> Result<HttpResponse> {
    if let Err(errors) = payload.validate() {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(errors.to_string())));
    }

    match store.purchase(&payload.product_id).await {
        Ok(_) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            store.view(),
            "Subscription activated".to_string(),
        ))),
        Err(e) => Ok(error_response(&e)),
    }
}

#[post("/entitlement/restore")]
pub async fn restore(store: Data<EntitlementStore>) -> Result<HttpResponse> {
    match store.restore().await {
        Ok(true) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            store.view(),
            "Purchases restored".to_string(),
        ))),
        Ok(false) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            store.view(),
            "No previous purchases found".to_string(),
        ))),
        Err(e) => Ok(error_response(&e)),
    }
}

#[post("/entitlement/refresh")]
pub async fn refresh(store: Data<EntitlementStore>) -> Result<HttpResponse> {
    match store.refresh().await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(store.view()))),
        Err(e) => Ok(error_response(&e)),
    }
}

#[post("/debug/expire-trial")]
pub async fn expire_trial(store: Data<EntitlementStore>) -> Result<HttpResponse> {
    match store.force_expire_trial().await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(store.view()))),
        Err(e) => Ok(error_response(&e)),
    }
}

#[post("/debug/reset-trial")]
pub async fn reset_trial(
    store: Data<EntitlementStore>,
    payload: Json<ResetTrialRequest>,
) -> Result<HttpResponse> {
    if let Err(errors) = payload.validate() {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(errors.to_string())));
    }

    match store.reset_trial(payload.days.unwrap_or(7)).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(store.view()))),
        Err(e) => Ok(error_response(&e)),
    }
}
