//! Shared application state handed to every Axum handler.

use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::health::HealthAggregator;
use crate::supervisor::Supervisor;

pub struct AppState {
    pub config: Config,
    pub supervisor: Arc<Supervisor>,
    pub health: Arc<HealthAggregator>,
    pub http_client: Client,
}

impl AppState {
    pub fn new(config: Config, supervisor: Arc<Supervisor>, health: Arc<HealthAggregator>) -> Self {
        let http_client = Client::builder()
            .build()
            .expect("building the upstream HTTP client cannot fail");
        Self {
            config,
            supervisor,
            health,
            http_client,
        }
    }
}
