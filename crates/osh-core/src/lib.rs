//! osh-core: shared library for the osh command server.
//!
//! Provides the authorized-key allowlist, connection identity and
//! fingerprints, typed channel-request decoding, the outbound transport
//! boundary, and the command registry/dispatcher.

pub mod commands;
pub mod error;
pub mod identity;
pub mod keys;
pub mod request;
pub mod transport;

// Re-export commonly used items at crate root.
pub use error::{OshError, OshResult};
pub use identity::{fingerprint, short_fingerprint, Identity, Permissions};
pub use keys::AuthorizedKeySet;
pub use request::{ChannelRequest, ReplyHandle, Request};
pub use transport::ChannelSink;
