//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{Coordinator, CoordinatorHandle};
use crate::ws::hub::ConnectionHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: ConnectionHub,
    pub coordinator: CoordinatorHandle,
}

impl AppState {
    /// Build the state and the coordinator it talks to. The caller spawns
    /// `Coordinator::run`.
    pub fn new(config: Config) -> (Self, Coordinator) {
        let config = Arc::new(config);

        // Every open socket, joined or not
        let hub = ConnectionHub::new();

        let (coordinator, handle) = Coordinator::new(config.match_settings.clone(), hub.clone());

        let state = Self {
            config,
            hub,
            coordinator: handle,
        };
        (state, coordinator)
    }
}
