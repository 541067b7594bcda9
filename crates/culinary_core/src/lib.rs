pub mod collection;
pub mod domain;
pub mod error;
pub mod generation;
pub mod location;
pub mod ports;
pub mod session;

pub use collection::{CollectionStore, RecipeCollection};
pub use domain::{AuthEvent, AuthEventKind, GenerationRequest, RecipeRecord, Session, WorkflowRequest};
pub use error::FlowError;
pub use generation::{GenerationCoordinator, GenerationEffect, GenerationSettings, GenerationStatus};
pub use location::CredentialMarkers;
pub use ports::{
    AuthEventStream, AuthService, PortError, PortResult, RecipeStore, Scheduler, Timer, WorkflowTrigger,
};
pub use session::{LinkStatus, ResolverEffect, ResolverSettings, ResolverState, SessionResolver};
