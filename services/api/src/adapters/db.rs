//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, a concrete implementation of the
//! `RecipeStore` port that reads the `recipes` table directly with `sqlx`.
//! It is used when the service runs next to the database instead of going
//! through PostgREST.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use culinary_core::domain::{RecipeRecord, Session};
use culinary_core::ports::{PortError, PortResult, RecipeStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `RecipeStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct RecipeRow {
    id: String,
    user_id: Uuid,
    title: Option<String>,
    ingredients: String,
    instructions: String,
    tips: Option<String>,
    created_at: DateTime<Utc>,
}
impl RecipeRow {
    fn to_domain(self) -> RecipeRecord {
        RecipeRecord {
            id: self.id,
            owner: self.user_id,
            title: self.title,
            ingredients: self.ingredients,
            instructions: self.instructions,
            tips: self.tips,
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// `RecipeStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl RecipeStore for DbAdapter {
    async fn list_recipes(&self, session: &Session) -> PortResult<Vec<RecipeRecord>> {
        let records = sqlx::query_as::<_, RecipeRow>(
            "SELECT id::text AS id, user_id, title, ingredients, instructions, tips, created_at \
             FROM recipes WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(session.user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn delete_recipe(&self, session: &Session, recipe_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM recipes WHERE id::text = $1 AND user_id = $2")
            .bind(recipe_id)
            .bind(session.user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }
}

fn map_db_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => PortError::Unreachable(e.to_string()),
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        _ => PortError::Unexpected(e.to_string()),
    }
}
