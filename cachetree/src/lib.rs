pub mod api;
pub mod config;
pub mod simulate;

pub use api::{ApiError, ApiServer, ApiServerConfig};
pub use simulate::{SimulationReport, Workload};
