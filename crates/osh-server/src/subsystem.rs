//! Named subsystem servers (bulk file transfer and the like).
//!
//! Subsystems are external collaborators: a channel that requests a
//! supported name is acknowledged and then handed over wholesale — data
//! stream, sink, and identity. This module only owns the seam.

use osh_core::{ChannelSink, Identity, OshResult};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything a subsystem server receives at handoff.
pub struct SubsystemIo {
    /// Inbound channel data, as delivered by the transport.
    pub data: mpsc::Receiver<Vec<u8>>,
    /// Write side of the channel.
    pub sink: Arc<dyn ChannelSink>,
    /// Identity of the connection the channel belongs to.
    pub identity: Option<Identity>,
}

/// A server for one named subsystem.
pub trait Subsystem: Send + Sync {
    /// Serve the handed-over channel until it is done.
    fn serve(&self, io: SubsystemIo) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + '_>>;
}

/// Registry of supported subsystems, keyed by request name.
///
/// Populated once at startup, read-only during request handling. The
/// default registry is empty: every subsystem request is rejected until an
/// external server is registered.
#[derive(Default)]
pub struct SubsystemRegistry {
    servers: HashMap<String, Arc<dyn Subsystem>>,
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subsystem server. The last registration for a name wins.
    pub fn register(&mut self, name: impl Into<String>, server: Arc<dyn Subsystem>) {
        self.servers.insert(name.into(), server);
    }

    /// Look up the server for a subsystem name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Subsystem>> {
        self.servers.get(name).cloned()
    }
}
