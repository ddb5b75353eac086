use std::sync::Arc;

use crate::auth::JwtService;
use crate::store::EventStore;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub jwt: Arc<JwtService>,
}

impl AppState {
    pub fn new(store: Arc<dyn EventStore>, jwt: JwtService) -> Self {
        Self {
            store,
            jwt: Arc::new(jwt),
        }
    }
}
