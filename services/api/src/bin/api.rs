//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, GoTrueClient, PostgrestRecipeStore, WebhookWorkflowAdapter},
    config::Config,
    error::ApiError,
    web::{
        delete_recipe_handler, list_recipes_handler, middleware::require_auth, rest::ApiDoc,
        state::AppState, ws_handler,
    },
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    middleware as axum_middleware,
    routing::{delete, get},
    Router,
};
use culinary_core::ports::{RecipeStore, WorkflowTrigger};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize HTTP Clients ---
    let http = reqwest::Client::builder().build()?;
    let workflow_http = reqwest::Client::builder()
        .timeout(config.workflow_timeout)
        .build()?;

    // --- 3. Choose the Recipe Store ---
    let recipes: Arc<dyn RecipeStore> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            info!("Reading recipes through PostgREST at {}", config.supabase_url);
            Arc::new(PostgrestRecipeStore::new(
                http.clone(),
                &config.supabase_url,
                config.supabase_anon_key.clone(),
            ))
        }
    };

    // --- 4. Initialize Service Adapters ---
    let gotrue = GoTrueClient::new(
        http.clone(),
        &config.supabase_url,
        config.supabase_anon_key.clone(),
    );
    let workflow: Arc<dyn WorkflowTrigger> = Arc::new(WebhookWorkflowAdapter::new(
        workflow_http,
        config.workflow_url.clone(),
    ));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        gotrue,
        recipes,
        workflow,
    });

    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // The page protocol authenticates inside the connection.
    let public_routes = Router::new().route("/ws", get(ws_handler));

    let protected_routes = Router::new()
        .route("/recipes", get(list_recipes_handler))
        .route("/recipes/{id}", delete(delete_recipe_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
