//! Authorized-keys allowlist.
//!
//! The blob is the standard newline-delimited `algorithm base64-material
//! [comment]` listing. Membership is keyed on the canonical SSH wire
//! encoding of each key, never on the textual line, so a comment change
//! cannot affect an authentication decision.

use crate::error::{OshError, OshResult};
use std::collections::HashSet;

/// Immutable set of trusted public keys, built once at startup.
#[derive(Debug, Default)]
pub struct AuthorizedKeySet {
    keys: HashSet<Vec<u8>>,
}

impl AuthorizedKeySet {
    /// Parse an authorized-keys blob into a key set.
    ///
    /// Blank lines and `#` comment lines are skipped. Any other unparsable
    /// entry fails the whole build — callers must abort startup rather than
    /// serve with a short allowlist. Duplicate entries collapse to one.
    pub fn parse(blob: &str) -> OshResult<Self> {
        let mut keys = HashSet::new();
        for (lineno, line) in blob.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let key = ssh_key::PublicKey::from_openssh(line)
                .map_err(|e| OshError::MalformedKey(format!("line {}: {e}", lineno + 1)))?;
            let wire = key
                .to_bytes()
                .map_err(|e| OshError::MalformedKey(format!("line {}: {e}", lineno + 1)))?;
            keys.insert(wire);
        }
        Ok(Self { keys })
    }

    /// Whether a key, given by its canonical wire encoding, is trusted.
    pub fn contains(&self, key_wire: &[u8]) -> bool {
        self.keys.contains(key_wire)
    }

    /// Number of distinct trusted keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the allowlist is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
