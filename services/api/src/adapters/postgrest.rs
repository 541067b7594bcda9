//! services/api/src/adapters/postgrest.rs
//!
//! A `RecipeStore` backed by Supabase's PostgREST endpoint. Requests carry the
//! user's access token so row-level security applies on top of the explicit
//! `user_id` filter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use culinary_core::domain::{RecipeRecord, Session};
use culinary_core::ports::{PortResult, RecipeStore};
use serde::Deserialize;
use uuid::Uuid;

use super::http::{ensure_authorized, transport_error};

#[derive(Deserialize)]
struct RecipeRow {
    /// Either a uuid string or a bigint, depending on how the table was created.
    id: serde_json::Value,
    user_id: Uuid,
    title: Option<String>,
    ingredients: Option<String>,
    instructions: Option<String>,
    tips: Option<String>,
    created_at: DateTime<Utc>,
}

impl RecipeRow {
    fn to_domain(self) -> RecipeRecord {
        let id = match self.id {
            serde_json::Value::String(id) => id,
            other => other.to_string(),
        };
        RecipeRecord {
            id,
            owner: self.user_id,
            title: self.title,
            ingredients: self.ingredients.unwrap_or_default(),
            instructions: self.instructions.unwrap_or_default(),
            tips: self.tips,
            created_at: self.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PostgrestRecipeStore {
    http: reqwest::Client,
    table_url: String,
    anon_key: String,
}

impl PostgrestRecipeStore {
    pub fn new(http: reqwest::Client, supabase_url: &str, anon_key: impl Into<String>) -> Self {
        Self {
            http,
            table_url: format!("{}/rest/v1/recipes", supabase_url.trim_end_matches('/')),
            anon_key: anon_key.into(),
        }
    }
}

#[async_trait]
impl RecipeStore for PostgrestRecipeStore {
    async fn list_recipes(&self, session: &Session) -> PortResult<Vec<RecipeRecord>> {
        let owner = format!("eq.{}", session.user_id);
        let response = self
            .http
            .get(&self.table_url)
            .query(&[
                ("select", "*"),
                ("user_id", owner.as_str()),
                ("order", "created_at.desc"),
            ])
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(transport_error)?;
        let rows: Vec<RecipeRow> = ensure_authorized(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        Ok(rows.into_iter().map(RecipeRow::to_domain).collect())
    }

    async fn delete_recipe(&self, session: &Session, recipe_id: &str) -> PortResult<()> {
        let id = format!("eq.{}", recipe_id);
        let owner = format!("eq.{}", session.user_id);
        let response = self
            .http
            .delete(&self.table_url)
            .query(&[("id", id.as_str()), ("user_id", owner.as_str())])
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(transport_error)?;
        ensure_authorized(response).await?;
        Ok(())
    }
}
