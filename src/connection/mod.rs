pub mod client;
pub mod messages;
pub mod policy;
pub mod websocket;

pub use client::{
    ConnectionEvent, ConnectionManager, ConnectionState, Connector, Incoming, Link, Outgoing,
};
pub use messages::{InboundMessage, OutboundMessage};
pub use policy::ReconnectPolicy;
pub use websocket::{endpoint, WebSocketConnector, VOICE_PATH};
