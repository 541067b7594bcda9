//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::{protocol::RecipeView, state::AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use culinary_core::collection::CollectionStore;
use culinary_core::domain::Session;
use culinary_core::ports::PortError;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_recipes_handler,
        delete_recipe_handler,
    ),
    components(
        schemas(RecipeView)
    ),
    tags(
        (name = "Culinary Alchemy API", description = "Recipe collection endpoints. Generation and sign-in run over the /ws page protocol.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// List the caller's recipes, newest first.
///
/// Requires an `Authorization: Bearer <access token>` header.
#[utoipa::path(
    get,
    path = "/recipes",
    responses(
        (status = 200, description = "The caller's recipes", body = [RecipeView]),
        (status = 401, description = "Missing or invalid access token"),
        (status = 502, description = "The data store could not be reached")
    )
)]
pub async fn list_recipes_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<RecipeView>>, (StatusCode, String)> {
    let records = CollectionStore::new(app_state.recipes.clone())
        .load_all(&session)
        .await
        .map_err(|e| {
            error!("Failed to list recipes for {}: {}", session.user_id, e);
            port_status(e, "Failed to load recipes")
        })?;
    Ok(Json(records.iter().map(RecipeView::from).collect()))
}

/// Delete one of the caller's recipes. Deleting an absent id succeeds.
#[utoipa::path(
    delete,
    path = "/recipes/{id}",
    params(
        ("id" = String, Path, description = "The recipe id.")
    ),
    responses(
        (status = 204, description = "Recipe deleted"),
        (status = 401, description = "Missing or invalid access token"),
        (status = 502, description = "The data store could not be reached")
    )
)]
pub async fn delete_recipe_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(recipe_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    CollectionStore::new(app_state.recipes.clone())
        .delete(&session, &recipe_id)
        .await
        .map_err(|e| {
            error!("Failed to delete recipe {}: {}", recipe_id, e);
            port_status(e, "Failed to delete recipe")
        })?;
    info!("Recipe {} deleted by {}", recipe_id, session.user_id);
    Ok(StatusCode::NO_CONTENT)
}

fn port_status(e: PortError, message: &str) -> (StatusCode, String) {
    let status = match e {
        PortError::Unauthorized => StatusCode::UNAUTHORIZED,
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Unreachable(_) | PortError::Rejected { .. } => StatusCode::BAD_GATEWAY,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, message.to_string())
}
