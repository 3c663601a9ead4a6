//! Request/response calls into the host.
//!
//! - `call`: transport-independent call descriptions and typed replies.
//! - `client`: [`HostClient`], host-wide calls and the shared call path.
//! - `session`: [`Session`], calls scoped to one sender identity.

/// Call descriptions and reply decoding helpers.
pub mod call;
/// Host client and host-wide calls.
pub mod client;
/// Sender-scoped calls.
pub mod session;

pub use call::{CallTimeout, Reply, ResultKind, RpcCall, SENDER_PARAM};
pub(crate) use call::text_list_from_value;
pub use client::{HostClient, OperationError};
pub use session::Session;
