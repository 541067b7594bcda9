pub mod db;
pub mod gotrue;
mod http;
pub mod postgrest;
pub mod workflow;

pub use db::DbAdapter;
pub use gotrue::{GoTrueAuthAdapter, GoTrueClient, StoredTokens};
pub use postgrest::PostgrestRecipeStore;
pub use workflow::WebhookWorkflowAdapter;
