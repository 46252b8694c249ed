//! Main entry point for the bulk SMS dispatch server.
//! This crate wires the job store, the SMS gateway and the dispatch queue
//! behind the REST API and the provider webhook.

mod dispatch_manager;

use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, middleware::Logger, web};
use auth_services::jwt::JwtService;
use auth_services::middleware::AuthMiddleware;
use dispatch_manager::DispatchManager;
use job_store::database::*;
use job_store::{JobStore, PgJobStore};
use web_handlers::*;

fn json_error_handler(
    err: actix_web::error::JsonPayloadError,
    _req: &actix_web::HttpRequest,
) -> actix_web::Error {
    let message = err.to_string();
    actix_web::error::InternalError::from_response(
        err,
        HttpResponse::BadRequest().json(serde_json::json!({
            "error": "invalid-argument",
            "message": message
        })),
    )
    .into()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("🚀 Starting bulk SMS server...");

    // Create database connection pool
    let pool = match create_connection_pool().await {
        Ok(pool) => {
            log::info!("🗃️ Database pool created successfully");

            if let Err(e) = test_connection(&pool).await {
                log::error!("❌ Database connection test failed: {}", e);
            }
            pool
        }
        Err(e) => {
            log::error!("❌ Failed to create database pool: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run_migrations(&pool).await {
        log::error!("❌ Failed to run database migrations: {}", e);
        std::process::exit(1);
    }

    let jwt_service = match JwtService::from_env() {
        Ok(service) => service,
        Err(e) => {
            log::error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));

    let mut dispatch_manager = match DispatchManager::start(store.clone()) {
        Ok(manager) => manager,
        Err(e) => {
            log::error!("❌ Failed to start dispatch system: {}", e);
            log::warn!("🔧 Check TWILIO_* and SMS_STATUS_CALLBACK_URL settings");
            std::process::exit(1);
        }
    };

    let admission = web::Data::from(dispatch_manager.admission());
    let correlator = web::Data::from(dispatch_manager.correlator());
    let store = web::Data::from(store);

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    log::info!("🌐 Server will be available at: http://{}", bind_address);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(admission.clone())
            .app_data(correlator.clone())
            .app_data(store.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(Logger::default())
            .service(
                web::scope("/api/sends")
                    .wrap(AuthMiddleware::new(jwt_service.clone()))
                    .route("", web::post().to(create_send))
                    .route("/{send_id}", web::get().to(get_send)),
            )
            .route("/webhooks/sms/status", web::post().to(sms_status_callback))
            .route("/health", web::get().to(|| async { HttpResponse::Ok().body("OK") }))
    })
    .bind(&bind_address)?
    .run()
    .await;

    dispatch_manager.stop().await;
    server
}
