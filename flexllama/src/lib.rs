//! Library surface for integration tests; `main.rs` compiles the same
//! modules again as the binary crate, mirroring the split in the gateway
//! this binary is modeled on.

pub mod catalog;
pub mod config;
pub mod error;
pub mod health;
pub mod proxy;
pub mod routes;
pub mod runner;
pub mod state;
pub mod supervisor;

pub use catalog::Catalog;
pub use config::Config;
pub use error::{Error, Result};
pub use health::HealthAggregator;
pub use state::AppState;
pub use supervisor::Supervisor;
