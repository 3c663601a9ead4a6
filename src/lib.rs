//! Plugin-side Rust SDK for the autMan bot host.
//!
//! The crate is organized by concern:
//! - `config`: host endpoint selection and plugin process arguments.
//! - `transport`: the Unix-socket and loopback wire styles behind one trait.
//! - `rpc`: host-wide and sender-scoped calls.
//! - `stream`: the inbound message stream and its cancellation.

/// Host configuration and process arguments.
pub mod config;
/// Host calls and sender sessions.
pub mod rpc;
/// Inbound event stream listener.
pub mod stream;
/// Wire transports.
pub mod transport;

pub use config::{HostConfig, PluginArgs};
pub use rpc::{HostClient, OperationError, Session};
pub use stream::{EventListener, SubscribeTarget, Subscription};
pub use tokio_util::sync::CancellationToken;
pub use transport::CallError;
