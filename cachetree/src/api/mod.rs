//! HTTP control surface for a running cache tree

pub mod error;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{ApiServer, ApiServerConfig};
