//! Clients for the collaborators this service depends on but does not own.

pub mod auth;
pub mod things;

pub use auth::{AuthorizationClient, Claims, JwtAuthorizationClient};
pub use things::{HttpThingDirectoryClient, ThingDirectoryClient};
