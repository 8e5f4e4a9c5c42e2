use std::sync::Arc;

use crate::availability::AvailabilityMonitor;
use crate::config::Config;
use crate::notifier::{FileRefProvider, Notifier};
use crate::registry::Registry;
use crate::storage::Storage;

/// Application context containing shared dependencies
/// This reduces parameter passing and makes it easier to add new dependencies
#[derive(Clone)]
pub struct AppContext {
    pub storage: Arc<dyn Storage>,
    pub registry: Registry,
    pub notifier: Arc<dyn Notifier>,
    pub files: Arc<dyn FileRefProvider>,
    pub availability: Arc<AvailabilityMonitor>,
    pub config: Arc<Config>,
}

impl AppContext {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Registry,
        notifier: Arc<dyn Notifier>,
        files: Arc<dyn FileRefProvider>,
        availability: Arc<AvailabilityMonitor>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            storage,
            registry,
            notifier,
            files,
            availability,
            config,
        }
    }
}
