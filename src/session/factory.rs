use anyhow::Result;

use super::config::SessionConfig;
use super::session::SessionParts;

/// Builds the connector and devices for a new session
///
/// The HTTP API and the CLI go through this so tests can substitute fakes.
pub trait SessionFactory: Send + Sync {
    fn create(&self, config: &SessionConfig) -> Result<SessionParts>;
}

/// WebSocket connection plus the default system microphone and speaker
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSessionFactory;

#[cfg(feature = "native-audio")]
impl SessionFactory for SystemSessionFactory {
    fn create(&self, _config: &SessionConfig) -> Result<SessionParts> {
        use crate::audio::native::{CpalInput, CpalOutput};
        use crate::connection::WebSocketConnector;

        Ok(SessionParts {
            connector: Box::new(WebSocketConnector::new()),
            input: Box::new(CpalInput::new()),
            output: Box::new(CpalOutput::new()),
        })
    }
}

#[cfg(not(feature = "native-audio"))]
impl SessionFactory for SystemSessionFactory {
    fn create(&self, _config: &SessionConfig) -> Result<SessionParts> {
        anyhow::bail!("built without audio device support; rebuild with --features native-audio")
    }
}
