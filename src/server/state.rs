use std::sync::Arc;
use std::time::Instant;

use crate::app_context::AppContext;

#[derive(Clone)]
pub struct ServeState {
    pub(crate) context: Arc<AppContext>,
    started_at: Instant,
}

impl ServeState {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            context,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
