//! Real-time hub client.
//!
//! A [`Connection`] negotiates with the server, then tries transports in
//! order (web sockets, server-sent events, frame polling, long polling)
//! until one connects. It keeps the session alive across drops, watches
//! keep-alive traffic, and publishes lifecycle events on an [`EventBus`].
//! A [`HubConnection`] layers hub RPC and server broadcasts on top.

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod hub;
pub mod keepalive;
pub mod net;
pub mod protocol;
mod selector;
pub mod state;
mod timer;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{ClientConfig, HubOptions, QueryString, StartOptions, TransportChoice, TransportPreference};
pub use connection::{Connection, StopOptions, WeakConnection};
pub use error::{ClientError, NetError};
pub use events::{ConnectionEvent, EventBus, SubscriptionId};
pub use hub::{HandlerId, HubConnection, HubProxy, Invocation, InvocationRegistry, arg};
pub use keepalive::KeepAliveSettings;
pub use net::Net;
pub use state::ConnectionState;
pub use transport::{Transport, TransportFactory, TransportRegistry};
