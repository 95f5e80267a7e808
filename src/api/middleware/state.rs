use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::Config;
use crate::services::lifecycle::LifecycleService;

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LifecycleService>,
    pub config: Config,
}

impl FromRef<AppState> for Arc<LifecycleService> {
    fn from_ref(state: &AppState) -> Arc<LifecycleService> {
        state.service.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Config {
        state.config.clone()
    }
}
