use std::sync::Arc;

use crate::relay::RelayService;

/// Shared gateway state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
}

impl AppState {
    pub fn new(relay: Arc<RelayService>) -> Self {
        Self { relay }
    }
}
