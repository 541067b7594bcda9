pub mod middleware;
pub mod page;
pub mod protocol;
pub mod rest;
pub mod scheduler;
pub mod state;
pub mod ws_handler;

// Re-export the handlers to make them easily accessible
// to the binary that will build the web server router.
pub use middleware::require_auth;
pub use rest::{delete_recipe_handler, list_recipes_handler};
pub use ws_handler::ws_handler;
