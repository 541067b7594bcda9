//! crates/culinary_core/src/collection.rs
//!
//! Loading and deleting the session owner's recipes, and the page-local view
//! of them.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{RecipeRecord, Session};
use crate::ports::{PortResult, RecipeStore};

/// Owner-scoped wrapper around a `RecipeStore`.
#[derive(Clone)]
pub struct CollectionStore {
    store: Arc<dyn RecipeStore>,
}

impl CollectionStore {
    pub fn new(store: Arc<dyn RecipeStore>) -> Self {
        Self { store }
    }

    /// The session owner's records, newest first. Rows owned by anyone else are dropped.
    pub async fn load_all(&self, session: &Session) -> PortResult<Vec<RecipeRecord>> {
        let mut records = self.store.list_recipes(session).await?;
        let before = records.len();
        records.retain(|r| r.owner == session.user_id);
        if records.len() != before {
            warn!(
                "Store returned {} recipes not owned by {}",
                before - records.len(),
                session.user_id
            );
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub async fn delete(&self, session: &Session, recipe_id: &str) -> PortResult<()> {
        self.store.delete_recipe(session, recipe_id).await
    }
}

/// The recipes currently shown on the page.
///
/// Ids deleted during this page activation are remembered so a fetch that
/// started before the delete cannot bring them back. Every fetch takes a
/// ticket from `begin_fetch`, and a response is only applied if no fetch
/// issued after it has been applied already.
#[derive(Debug, Default)]
pub struct RecipeCollection {
    records: Vec<RecipeRecord>,
    deleted: HashSet<String>,
    issued: u64,
    applied: u64,
}

impl RecipeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[RecipeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, recipe_id: &str) -> bool {
        self.records.iter().any(|r| r.id == recipe_id)
    }

    /// Hands out the ticket a fetch must present to `reconcile`.
    pub fn begin_fetch(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Takes a freshly fetched full set as the new view, minus locally deleted ids.
    /// Returns false, leaving the view alone, when a newer fetch was applied first.
    pub fn reconcile(&mut self, ticket: u64, fetched: Vec<RecipeRecord>) -> bool {
        if ticket <= self.applied {
            debug!(
                "Dropping fetch {} superseded by fetch {}",
                ticket, self.applied
            );
            return false;
        }
        self.applied = ticket;
        let mut seen = HashSet::new();
        let mut records: Vec<RecipeRecord> = fetched
            .into_iter()
            .filter(|r| !self.deleted.contains(&r.id))
            .filter(|r| seen.insert(r.id.clone()))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.records = records;
        true
    }

    /// Removes a record after its delete succeeded. Returns whether it was visible.
    pub fn remove(&mut self, recipe_id: &str) -> bool {
        self.deleted.insert(recipe_id.to_string());
        let before = self.records.len();
        self.records.retain(|r| r.id != recipe_id);
        self.records.len() != before
    }

    /// Forgets everything, e.g. after sign-out. Tickets keep counting so a
    /// fetch issued before the clear stays stale.
    pub fn clear(&mut self) {
        self.records.clear();
        self.deleted.clear();
        self.applied = self.issued;
    }
}
