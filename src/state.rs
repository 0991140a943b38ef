//! Shared application state for all routes.

use crate::auth::SessionLookup;
use crate::registry::RegistryContext;
use crate::settings::Settings;
use crate::store::Storage;
use std::sync::Arc;

/// Everything a handler needs. The registry is frozen, so no lock guards it.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryContext>,
    pub store: Arc<dyn Storage>,
    pub sessions: Arc<dyn SessionLookup>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        registry: RegistryContext,
        store: Arc<dyn Storage>,
        sessions: Arc<dyn SessionLookup>,
        settings: Settings,
    ) -> Self {
        AppState {
            registry: Arc::new(registry),
            store,
            sessions,
            settings: Arc::new(settings),
        }
    }
}
