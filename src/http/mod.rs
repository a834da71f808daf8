//! HTTP surface: admission middleware, route groups, and the server shell.

mod middleware;
mod router;
mod server;

pub use middleware::{AdmissionLayer, AdmissionService};
pub use router::api_router;
pub use server::ApiServer;
