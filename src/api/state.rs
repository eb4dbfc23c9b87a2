use std::sync::Arc;

use crate::feed::StateFeed;
use crate::lifecycle::Engine;

#[derive(Clone)]
pub struct AppState {
    pub feed: StateFeed,
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            feed: StateFeed::new(engine.store().clone()),
            engine,
        }
    }
}
