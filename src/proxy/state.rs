use std::sync::Arc;

use super::config::ProxySettings;
use super::traits::Backend;

/// Shared state for proxy route handlers.
pub(super) struct ProxyState<B> {
    pub(super) backend: Arc<B>,
    pub(super) settings: ProxySettings,
}

// Manual Clone: avoid derive adding a `B: Clone` bound.
impl<B: Backend> Clone for ProxyState<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            settings: self.settings.clone(),
        }
    }
}
