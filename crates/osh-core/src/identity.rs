//! Connection identity and public-key fingerprints.
//!
//! Fingerprints are hex-encoded SHA-256 digests of a key's canonical wire
//! encoding, so two entries that differ only in their comment produce the
//! same fingerprint.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Extension key under which the accepting key's fingerprint is recorded.
pub const EXT_PUBKEY_FINGERPRINT: &str = "pubkey-fp";

/// Identity of an authenticated connection.
///
/// Owned by the transport layer and only read by the core. Handlers receive
/// it as `Option<&Identity>` — an absent identity is an anonymous context and
/// every handler must tolerate it.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Username presented during the handshake.
    pub username: String,
    /// Opaque extension map attached at authentication time.
    pub extensions: HashMap<String, String>,
}

impl Identity {
    /// Build an identity from a username and the permissions granted at auth.
    pub fn new(username: impl Into<String>, permissions: Permissions) -> Self {
        Self {
            username: username.into(),
            extensions: permissions.extensions,
        }
    }

    /// Fingerprint of the key this identity authenticated with, if recorded.
    pub fn fingerprint(&self) -> Option<&str> {
        self.extensions.get(EXT_PUBKEY_FINGERPRINT).map(|s| s.as_str())
    }
}

/// Extension record returned by a successful authentication.
///
/// Carries audit metadata only — it grants nothing beyond the connection
/// itself.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    pub extensions: HashMap<String, String>,
}

impl Permissions {
    /// Permissions carrying the accepting key's fingerprint.
    pub fn with_fingerprint(fingerprint: String) -> Self {
        let mut extensions = HashMap::new();
        extensions.insert(EXT_PUBKEY_FINGERPRINT.to_string(), fingerprint);
        Self { extensions }
    }
}

/// Compute the full hex-encoded SHA-256 fingerprint of a key's wire encoding.
pub fn fingerprint(key_wire: &[u8]) -> String {
    let hash = Sha256::digest(key_wire);
    hex::encode(hash)
}

/// Short display form of a fingerprint for log lines.
pub fn short_fingerprint(fp: &str) -> &str {
    &fp[..8.min(fp.len())]
}
