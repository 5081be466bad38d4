//! FlexLLama Common Types
//!
//! Wire shapes shared by the gateway's router, supervisor, and health
//! aggregator: the OpenAI-compatible model listing, the minimal request
//! peek used for dispatch, and the `/health` response body.

pub mod health;
pub mod model;
pub mod peek;

pub use health::{HealthResponse, ModelHealth, ModelHealthStatus, RunnerInfo};
pub use model::{ModelKind, ModelObject, ModelsResponse};
pub use peek::RequestPeek;
