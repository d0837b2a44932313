use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber;

mod config;
mod database;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use database::connection::get_db_client;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let db = get_db_client().await;
    let app_state = initialize_app_state(db).await;

    let app = build_router(app_state).await;
    start_server(app).await;
}

async fn initialize_app_state(db: mongodb::Database) -> AppState {
    let mut app_state = AppState::new(db);

    tracing::info!("🔧 Attempting to initialize payment gateway...");

    // Try to load AppConfig
    let config_result = std::panic::catch_unwind(|| config::AppConfig::from_env());

    match config_result {
        Ok(config) => {
            tracing::info!("✅ App config loaded successfully");
            tracing::info!("🔧 Config: {}", config.get_config_info());

            let gateway = Arc::new(services::gateway_service::CaptureGateway::new(config));

            // Try to get an access token to verify credentials
            match gateway.get_access_token().await {
                Ok(token) => {
                    tracing::info!("✅ PSP access token obtained");
                    tracing::debug!("Token (first 20 chars): {}", &token[0..20.min(token.len())]);
                    app_state = app_state.with_gateway(gateway);
                    tracing::info!("✅ Payment gateway initialized and ready");
                }
                Err(e) => {
                    tracing::error!("❌ Failed to get PSP access token: {}", e);
                    tracing::warn!("Card captures and refunds will be disabled");
                }
            }
        }
        Err(_) => {
            tracing::error!("❌ Failed to load App config (panic caught)");
            tracing::warn!("Card captures and refunds will be disabled");
        }
    }

    app_state
}

async fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/api/bookings", routes::bookings::routes())
        .nest("/api/disputes", routes::disputes::routes())
        .nest("/api/attendance", routes::attendance::routes())
        .nest("/api/notifications", routes::notifications::routes())
        .nest("/api/cron", routes::cron::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router) {
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = SocketAddr::from(([0, 0, 0, 0], port.parse().unwrap_or(3000)));

    tracing::info!("🚀 Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            axum::serve(listener, app).await.unwrap();
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "🇨🇭 ServiSuisse Bookings API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    use mongodb::bson::doc;

    let db_status = match state.db.run_command(doc! {"ping": 1}).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "gateway": state.gateway.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
