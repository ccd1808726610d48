use axum::extract::State;
use axum::{http::Method, middleware as axum_middleware, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

mod config;
mod database;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use config::AppConfig;
use database::connection::{ensure_indexes, get_db_client};
use handlers::payment_requests::run_expire_sweep;
use middleware::auth::auth_middleware;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let db = get_db_client(&config.database_url, &config.database_name).await;
    ensure_indexes(&db).await?;

    let app_state = AppState::new(db, config.policy.clone(), config.jwt_secret.clone());

    spawn_expiry_sweeper(app_state.clone());

    let app = build_router(app_state);
    start_server(app, &config).await;
    Ok(())
}

// The expiry sweep is the one policy timeout the ledger owns; everything
// else is driven by the external scheduler through /api/scheduler.
fn spawn_expiry_sweeper(state: AppState) {
    let interval_secs = state.policy.expiry_sweep_interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = run_expire_sweep(&state.db, chrono::Utc::now()).await {
                tracing::error!("Expiry sweep failed: {}", e);
            }
        }
    });
}

fn build_router(app_state: AppState) -> Router {
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

    let api = Router::new()
        .nest("/payment-requests", routes::payment_requests::routes())
        .nest("/investments", routes::investments::routes())
        .nest("/withdrawals", routes::withdrawals::routes())
        .nest("/scheduler", routes::scheduler::routes())
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_middleware,
        ))
        // index reads are public; the admin half gates itself
        .nest("/indexes", routes::indexes::routes(app_state.clone()));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/api", api)
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, config: &AppConfig) {
    let addr = SocketAddr::from((
        config
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| [0, 0, 0, 0].into()),
        config.port,
    ));

    tracing::info!("🚀 Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Server error: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "📊 IndexVest Ledger API"
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
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
