use axum::{extract::Request, http::StatusCode, middleware, routing::get, Json, Router};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::{Config, StoreBackend};
use crate::handlers::{
    system_handlers::{health, metrics},
    user_handlers::{create_user, delete_user, get_user, get_users, update_user},
};
use crate::service::{ServiceResult, UserService};
use user_api_shared::models::ErrorResponse;
use user_api_shared::store::{dynamo::DynamoUserStore, memory::MemoryUserStore, UserStore};
use user_api_shared::telemetry::{telemetry_middleware, Telemetry};

/// Creates the router over the store selected by the config, seeding it
/// first when SEED_DATA is set.
pub async fn create_router(config: &Config, telemetry: Telemetry) -> ServiceResult<Router> {
    let prefix = config.route_prefix();
    info!("Using API route prefix: '{}'", prefix);

    match config.store {
        StoreBackend::Memory => {
            info!("Creating router with in-memory store");
            let store = Arc::new(MemoryUserStore::new());
            seed_if_requested(config, &store).await?;
            Ok(create_router_with_store(store, telemetry, prefix))
        }
        StoreBackend::DynamoDb => {
            info!(
                "Creating router with DynamoDB store (table '{}')",
                config.dynamo_table
            );
            let store = Arc::new(DynamoUserStore::new(config.dynamo_table.clone()).await);
            seed_if_requested(config, &store).await?;
            Ok(create_router_with_store(store, telemetry, prefix))
        }
    }
}

async fn seed_if_requested<S>(config: &Config, store: &Arc<S>) -> ServiceResult<()>
where
    S: UserStore,
{
    if config.seed_data {
        UserService::new(store.clone()).seed().await?;
    }
    Ok(())
}

/// Creates a router with a given store implementation
pub fn create_router_with_store<S>(store: Arc<S>, telemetry: Telemetry, prefix: &str) -> Router
where
    S: UserStore,
{
    info!("Setting up API routes with prefix: '{}'", prefix);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let service = Arc::new(UserService::new(store));

    let api_routes = Router::new()
        .route("/api/user", get(get_users::<S>).post(create_user::<S>))
        .route(
            "/api/user/:id",
            get(get_user::<S>)
                .put(update_user::<S>)
                .patch(update_user::<S>)
                .delete(delete_user::<S>),
        )
        .with_state(service);

    let system_routes = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(telemetry.clone());

    let routes = api_routes.merge(system_routes);

    let router = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(prefix, routes)
    };

    router
        .fallback(|req: Request| async move {
            warn!("No route matched for: {} {}", req.method(), req.uri());
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "The requested resource was not found".to_string(),
                }),
            )
        })
        .layer(middleware::from_fn_with_state(
            telemetry,
            telemetry_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
