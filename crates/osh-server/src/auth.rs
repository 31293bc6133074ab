//! Public-key authentication against the allowlist.

use osh_core::identity::{fingerprint, Permissions};
use osh_core::{AuthorizedKeySet, OshError, OshResult};

/// Accept/reject predicate consulted by the transport during connection
/// setup.
///
/// Stateless across calls: the decision is a pure function of the registry
/// and the presented key. Retrying with another key, or terminating the
/// connection, is the transport's business.
pub struct Authenticator {
    keys: AuthorizedKeySet,
}

impl Authenticator {
    pub fn new(keys: AuthorizedKeySet) -> Self {
        Self { keys }
    }

    /// Decide whether a presented public key may authenticate `user`.
    ///
    /// `key_wire` is the canonical wire encoding of the presented key. On
    /// acceptance the returned permissions carry the key's fingerprint,
    /// used for audit logging only.
    pub fn authenticate(&self, user: &str, key_wire: &[u8]) -> OshResult<Permissions> {
        if self.keys.contains(key_wire) {
            Ok(Permissions::with_fingerprint(fingerprint(key_wire)))
        } else {
            Err(OshError::AuthRejected {
                user: user.to_string(),
            })
        }
    }

    /// Number of keys in the allowlist.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}
