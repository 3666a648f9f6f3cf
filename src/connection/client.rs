use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::messages::OutboundMessage;
use super::policy::ReconnectPolicy;
use crate::error::ConnectionError;

/// Frame written to the duplex connection
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Frame read from the duplex connection
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Text(String),
    Closed { reason: Option<String> },
}

/// An open duplex connection
///
/// Everything written goes through `outbound`, which feeds a single writer
/// task owned by the connector.
pub struct Link {
    pub outbound: mpsc::Sender<Outgoing>,
    pub inbound: mpsc::Receiver<Incoming>,
}

/// Opens duplex connections
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Link, ConnectionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out a reconnect delay
    Backoff,
    /// Closed by the user or out of retries; never reconnects
    Terminated,
}

/// What happened on the connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connection attempt succeeded
    Opened,
    /// A text message arrived
    Message(String),
    /// The connection dropped or an attempt failed; a retry is scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Retries are exhausted
    Failed(ConnectionError),
}

/// Owns the duplex connection and its reconnect policy
pub struct ConnectionManager {
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
    link: Option<Link>,
    retry_at: Option<Instant>,
    /// Connect attempt in flight; survives `next_event` being dropped
    pending: Option<BoxFuture<'static, Result<Link, ConnectionError>>>,
}

impl ConnectionManager {
    pub fn new(url: String, connector: Box<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            url,
            connector: Arc::from(connector),
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            link: None,
            retry_at: None,
            pending: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.link.is_some()
    }

    /// Ask `next_event` to start connecting
    pub fn start(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
    }

    /// Make one connection attempt
    ///
    /// Resumes the attempt left in flight by a cancelled call instead of
    /// starting a new one.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Terminated {
            return Err(ConnectionError::NotConnected);
        }

        self.state = ConnectionState::Connecting;

        let attempt = self.pending.get_or_insert_with(|| {
            info!("Connecting to {}", self.url);
            let connector = Arc::clone(&self.connector);
            let url = self.url.clone();
            async move { connector.connect(&url).await }.boxed()
        });
        let result = attempt.await;
        self.pending = None;

        match result {
            Ok(link) => {
                self.link = Some(link);
                self.attempts = 0;
                self.state = ConnectionState::Connected;
                info!("Connected to {}", self.url);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Drive the connection until something happens
    ///
    /// Handles connecting, reading and backoff. Cancel-safe: dropping the
    /// future during a backoff or a connect attempt leaves the manager ready
    /// to resume on the next call, or to be `disconnect`ed.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            match self.state {
                ConnectionState::Connected => {
                    let incoming = match self.link.as_mut() {
                        Some(link) => link.inbound.recv().await,
                        None => None,
                    };

                    match incoming {
                        Some(Incoming::Text(text)) => return ConnectionEvent::Message(text),
                        Some(Incoming::Closed { reason }) => {
                            let reason = reason.unwrap_or_else(|| "closed by peer".to_string());
                            return self.drop_and_retry(&reason);
                        }
                        None => return self.drop_and_retry("connection task ended"),
                    }
                }
                ConnectionState::Backoff => {
                    if let Some(at) = self.retry_at {
                        tokio::time::sleep_until(at).await;
                    }
                    self.retry_at = None;
                    self.state = ConnectionState::Connecting;
                }
                ConnectionState::Connecting => match self.connect().await {
                    Ok(()) => return ConnectionEvent::Opened,
                    Err(e) => {
                        warn!("Connection attempt failed: {}", e);
                        return self.schedule_retry();
                    }
                },
                ConnectionState::Disconnected | ConnectionState::Terminated => {
                    return std::future::pending().await;
                }
            }
        }
    }

    /// Abandon the current link after an unexpected loss and schedule a retry
    pub fn drop_and_retry(&mut self, reason: &str) -> ConnectionEvent {
        warn!("Connection lost: {}", reason);
        if let Some(link) = self.link.take() {
            let _ = link.outbound.try_send(Outgoing::Close);
        }
        self.state = ConnectionState::Disconnected;
        self.schedule_retry()
    }

    fn schedule_retry(&mut self) -> ConnectionEvent {
        match self.policy.next_delay(self.attempts) {
            Some(delay) => {
                self.attempts += 1;
                self.state = ConnectionState::Backoff;
                self.retry_at = Some(Instant::now() + delay);
                info!(
                    "Reconnecting in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    self.attempts,
                    self.policy.max_attempts
                );
                ConnectionEvent::Reconnecting {
                    attempt: self.attempts,
                    delay,
                }
            }
            None => {
                self.state = ConnectionState::Terminated;
                self.retry_at = None;
                error!("Giving up after {} reconnect attempts", self.attempts);
                ConnectionEvent::Failed(ConnectionError::RetriesExhausted {
                    attempts: self.attempts,
                })
            }
        }
    }

    /// Send a message; fails fast when not connected
    pub fn send(&self, message: &OutboundMessage) -> Result<(), ConnectionError> {
        let link = match (&self.link, self.state) {
            (Some(link), ConnectionState::Connected) => link,
            _ => return Err(ConnectionError::NotConnected),
        };

        let json =
            serde_json::to_string(message).map_err(|e| ConnectionError::Encode(e.to_string()))?;

        link.outbound
            .try_send(Outgoing::Text(json))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ConnectionError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => ConnectionError::NotConnected,
            })
    }

    /// Close for good, cancelling any pending retry
    ///
    /// Returns `true` if an open link was closed.
    pub fn disconnect(&mut self) -> bool {
        self.state = ConnectionState::Terminated;
        self.retry_at = None;
        self.pending = None;

        match self.link.take() {
            Some(link) => {
                if link.outbound.try_send(Outgoing::Close).is_err() {
                    debug!("Writer already gone while closing");
                }
                info!("Disconnected from {}", self.url);
                true
            }
            None => false,
        }
    }
}
