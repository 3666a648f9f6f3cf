use crate::config::Config;
use crate::session::{SessionFactory, SessionHandle, SystemSessionFactory};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    /// The voice session, if one was started (at most one per process)
    pub session: Arc<RwLock<Option<SessionHandle>>>,

    pub factory: Arc<dyn SessionFactory>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_factory(config, Arc::new(SystemSessionFactory))
    }

    pub fn with_factory(config: Config, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            config: Arc::new(config),
            session: Arc::new(RwLock::new(None)),
            factory,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
