//! crates/culinary_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like the auth service,
//! the recipe store or the workflow engine.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::domain::{AuthEvent, RecipeRecord, Session, WorkflowRequest};
use crate::location::CredentialMarkers;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// The collaborator could not be reached at all (connect failure, timeout).
    #[error("Service unreachable: {0}")]
    Unreachable(String),
    /// The collaborator answered with a non-success status.
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Stream of session-change notifications. Dropping it unsubscribes.
pub type AuthEventStream = Pin<Box<dyn Stream<Item = AuthEvent> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The one-time-link auth collaborator, scoped to a single page activation.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Returns the current session, refreshing it if the collaborator needs to.
    async fn get_session(&self) -> PortResult<Option<Session>>;

    /// Subscribes to sign-in, token-refresh and sign-out notifications.
    fn subscribe(&self) -> AuthEventStream;

    /// Hands the credential found in the location to the collaborator.
    /// Success is reported through a `SignedIn` notification, not the return value.
    async fn complete_link(&self, markers: &CredentialMarkers) -> PortResult<()>;

    /// Asks the collaborator to email a one-time link that returns to `redirect_to`.
    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> PortResult<()>;

    async fn sign_out(&self) -> PortResult<()>;
}

/// Owner-scoped access to stored recipe records.
#[async_trait]
pub trait RecipeStore: Send + Sync {
    /// All records owned by the session's user, newest first.
    async fn list_recipes(&self, session: &Session) -> PortResult<Vec<RecipeRecord>>;

    /// Deletes one of the session user's records. Deleting an absent id is not an error.
    async fn delete_recipe(&self, session: &Session, recipe_id: &str) -> PortResult<()>;
}

/// The fire-and-forget recipe generation workflow.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    async fn trigger(&self, request: &WorkflowRequest) -> PortResult<()>;
}

//=========================================================================================
// Scheduling Port
//=========================================================================================

/// A deferred wake-up requested by one of the state machines.
///
/// The epoch lets the owner discard firings that were scheduled before a
/// cancellation or a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    SessionCheck { epoch: u64 },
    GenerationPoll { epoch: u64 },
}

/// Delivers a `Timer` back to its owner after a delay.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, after: Duration, timer: Timer);
}
