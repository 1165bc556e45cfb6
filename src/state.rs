use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::queue::TaskQueue;
use crate::infrastructure::storage::ObjectStore;
use crate::modules::transcode::repository::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub jobs: Arc<dyn JobStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn TaskQueue>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn ObjectStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            config,
            jobs,
            storage,
            queue,
        }
    }
}
