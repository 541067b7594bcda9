//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server.
//! One connection is one page activation.

use chrono::{DateTime, Utc};
use culinary_core::domain::{preview, RecipeRecord};
use culinary_core::generation::GenerationStatus;
use culinary_core::session::{LinkStatus, ResolverState};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

const INGREDIENTS_PREVIEW_CHARS: usize = 80;
const INSTRUCTIONS_PREVIEW_CHARS: usize = 100;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts the page activation. This must be the first message sent on the connection.
    /// `location` is the full page URL; tokens are those persisted from an earlier visit.
    Init {
        location: String,
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default)]
        refresh_token: Option<String>,
    },

    /// Requests a one-time sign-in link for this address.
    SendLink { email: String },

    /// Submits an ingredient list to the recipe workflow.
    Generate { ingredients: String },

    DeleteRecipe { recipe_id: String },

    /// Reloads the recipe collection.
    Refresh,

    Logout,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ResolverState { state: ResolverStateView },

    LinkStatus { status: LinkStatusView },

    /// Credentials the client should persist for its next visit.
    SessionEstablished {
        user_id: Uuid,
        email: Option<String>,
        access_token: String,
        refresh_token: Option<String>,
    },

    Navigate { screen: Screen },

    /// The complete visible collection, newest first.
    Recipes { recipes: Vec<RecipeView> },

    RecipeRemoved { recipe_id: String },

    Generation {
        status: GenerationStatusView,
        message: Option<String>,
    },

    /// The ingredient input should be emptied.
    ClearInput,

    /// Reports a fatal error to the client, which should display an error message.
    Error { message: String },
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Login,
    Dashboard,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolverStateView {
    Initializing,
    AwaitingCredential,
    Authenticated,
    Anonymous,
    Failed,
}

impl From<&ResolverState> for ResolverStateView {
    fn from(state: &ResolverState) -> Self {
        match state {
            ResolverState::Initializing => Self::Initializing,
            ResolverState::AwaitingCredential { .. } => Self::AwaitingCredential,
            ResolverState::Authenticated { .. } => Self::Authenticated,
            ResolverState::Anonymous => Self::Anonymous,
            ResolverState::Failed => Self::Failed,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatusView {
    Idle,
    Sending,
    Sent,
    Error,
}

impl From<LinkStatus> for LinkStatusView {
    fn from(status: LinkStatus) -> Self {
        match status {
            LinkStatus::Idle => Self::Idle,
            LinkStatus::Sending => Self::Sending,
            LinkStatus::Sent => Self::Sent,
            LinkStatus::Error => Self::Error,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatusView {
    Idle,
    Submitting,
    Polling,
    Completed,
    TimedOut,
    Failed,
}

impl From<GenerationStatus> for GenerationStatusView {
    fn from(status: GenerationStatus) -> Self {
        match status {
            GenerationStatus::Idle => Self::Idle,
            GenerationStatus::Submitting => Self::Submitting,
            GenerationStatus::Polling => Self::Polling,
            GenerationStatus::Completed => Self::Completed,
            GenerationStatus::TimedOut => Self::TimedOut,
            GenerationStatus::Failed => Self::Failed,
        }
    }
}

/// A recipe as the client renders it, shared by the WebSocket and REST surfaces.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct RecipeView {
    pub id: String,
    pub title: String,
    pub ingredients: String,
    pub instructions: String,
    pub tips: Option<String>,
    pub ingredients_preview: String,
    pub instructions_preview: String,
    pub created_at: DateTime<Utc>,
}

impl From<&RecipeRecord> for RecipeView {
    fn from(record: &RecipeRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.display_title().to_string(),
            ingredients: record.ingredients.clone(),
            instructions: record.instructions.clone(),
            tips: record.tips.clone(),
            ingredients_preview: preview(&record.ingredients, INGREDIENTS_PREVIEW_CHARS),
            instructions_preview: preview(&record.instructions, INSTRUCTIONS_PREVIEW_CHARS),
            created_at: record.created_at,
        }
    }
}
