use crate::{config::AppConfig, schedule::RefreshSchedule, store::SensorStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SensorStore>,
    pub schedule: Arc<RefreshSchedule>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn SensorStore>,
        schedule: Arc<RefreshSchedule>,
    ) -> Self {
        Self {
            config,
            store,
            schedule,
        }
    }
}
