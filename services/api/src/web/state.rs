//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the settings each page
//! activation is created with.

use crate::adapters::GoTrueClient;
use crate::config::Config;
use culinary_core::generation::GenerationSettings;
use culinary_core::ports::{RecipeStore, WorkflowTrigger};
use culinary_core::session::ResolverSettings;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gotrue: GoTrueClient,
    pub recipes: Arc<dyn RecipeStore>,
    pub workflow: Arc<dyn WorkflowTrigger>,
}

//=========================================================================================
// PageSettings (Specific to One WebSocket Connection)
//=========================================================================================

#[derive(Debug, Clone)]
pub struct PageSettings {
    pub resolver: ResolverSettings,
    pub generation: GenerationSettings,
    /// Entry point emailed links return to.
    pub redirect_to: String,
}

impl PageSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            resolver: config.resolver,
            generation: config.generation,
            redirect_to: config.auth_redirect_url.clone(),
        }
    }
}
