//! crates/culinary_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Title shown for recipes the workflow stored without one.
pub const UNTITLED_RECIPE: &str = "Delicious Recipe";

/// Server-issued proof of identity for one user.
///
/// Only the auth adapter constructs these; the page layer observes
/// presence, absence and identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: Uuid,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// True once `expires_at` is within `leeway_secs` of `now` (or past it).
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - chrono::Duration::seconds(leeway_secs) <= now,
            None => false,
        }
    }
}

/// A generated recipe, owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeRecord {
    pub id: String,
    pub owner: Uuid,
    pub title: Option<String>,
    pub ingredients: String,
    pub instructions: String,
    pub tips: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RecipeRecord {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(UNTITLED_RECIPE)
    }
}

/// Shortens `text` to `max_chars` characters, appending an ellipsis.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Payload handed to the external recipe workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub ingredients: String,
    pub user_id: Uuid,
}

/// An in-flight generation, held only in page memory.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub ingredients_text: String,
    pub submitted_at: DateTime<Utc>,
    pub baseline_count: usize,
    /// Ids visible at submission; a fetched id outside this set is the new recipe.
    pub baseline_ids: HashSet<String>,
    pub owner: Option<Uuid>,
}

impl GenerationRequest {
    pub fn new(ingredients_text: &str, current: &[RecipeRecord], submitted_at: DateTime<Utc>) -> Self {
        Self {
            ingredients_text: ingredients_text.to_string(),
            submitted_at,
            baseline_count: current.len(),
            baseline_ids: current.iter().map(|r| r.id.clone()).collect(),
            owner: None,
        }
    }

    /// Returns the first fetched record that was not visible at submission.
    pub fn find_arrival<'a>(&self, fetched: &'a [RecipeRecord]) -> Option<&'a RecipeRecord> {
        fetched.iter().find(|r| !self.baseline_ids.contains(&r.id))
    }
}

/// Kinds of session-change notification published by the auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    TokenRefreshed,
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: AuthEventKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self {
            kind: AuthEventKind::TokenRefreshed,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: AuthEventKind::SignedOut,
            session: None,
        }
    }
}
