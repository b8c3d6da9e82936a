// Application state for diagnostics handlers
use crate::application::fetch_scheduler::FetchScheduler;
use crate::application::pipeline::Pipeline;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub fetcher: Arc<FetchScheduler>,
}
