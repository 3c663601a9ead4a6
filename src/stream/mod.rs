//! Inbound message stream.
//!
//! - `frame`: classification of individual stream lines.
//! - `listener`: streamed subscription, read loop and cancellation.

/// Stream line classification.
pub mod frame;
/// Event listener and subscription handles.
pub mod listener;

pub use frame::StreamFrame;
pub use listener::{EventListener, ListenerExit, SubscribeTarget, Subscription};
