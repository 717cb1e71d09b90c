use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;

use canieat_entitlements::config::{self, BackendMode};
use canieat_entitlements::{handlers, tasks};
use canieat_entitlements::services::{
    backend::{HttpPurchaseBackend, MockPurchaseBackend, PurchaseBackend},
    entitlement::EntitlementStore,
    storage,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = config::Config::from_env().expect("Failed to load configuration");

    let state = storage::open(&config.storage_url)
        .await
        .expect("Failed to open persisted state");

    let backend: Arc<dyn PurchaseBackend> = match config.backend.mode {
        BackendMode::Http => Arc::new(HttpPurchaseBackend::new(config.backend.clone())),
        BackendMode::Mock => {
            log::warn!("Using mock purchase backend; purchases are simulated");
            Arc::new(MockPurchaseBackend::new())
        }
    };

    let store = Arc::new(
        EntitlementStore::initialize(state, backend, config.entitlement.clone()).await,
    );

    let refresh_task = match config.entitlement.refresh_interval_secs {
        0 => None,
        secs => Some(tasks::refresh_task::start_refresh_task(
            store.clone(),
            Duration::from_secs(secs),
        )),
    };

    let debug_commands = config.entitlement.enable_debug_commands;
    if debug_commands {
        log::warn!("Debug trial commands are enabled");
    }

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting entitlement service on {}", bind_address);

    let data = web::Data::from(store.clone());
    let result = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(data.clone())
            .service(
                web::scope("/api/v1")
                    .configure(|cfg| handlers::configure(cfg, debug_commands)),
            )
    })
    .bind(&bind_address)?
    .run()
    .await;

    if let Some(handle) = refresh_task {
        handle.abort();
    }
    store.disconnect().await;
    log::info!("Entitlement service stopped");

    result
}
