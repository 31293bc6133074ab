//! SSH transport layer.
//!
//! Everything cryptographic — handshake, key exchange, encryption, wire
//! framing, channel multiplexing — belongs to russh. This module owns the
//! listener, hands russh the authentication predicate, and spawns one
//! connection task per accepted socket.

mod handler;

use crate::auth::Authenticator;
use crate::subsystem::SubsystemRegistry;
use anyhow::Context;
use handler::ConnectionHandler;
use osh_core::commands::CommandRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Listen address is fixed; it is not part of the configuration surface.
pub const LISTEN_ADDR: &str = "0.0.0.0:2023";

/// Read-only state shared by every connection.
pub struct ServerContext {
    pub authenticator: Authenticator,
    pub commands: Arc<CommandRegistry>,
    pub subsystems: Arc<SubsystemRegistry>,
}

/// Start serving.
///
/// `host_key_pem` is the server's already-encoded private key. Failures
/// before the accept loop (unparsable key, bind failure) are fatal;
/// failures on individual connections are logged and the loop continues.
pub async fn serve(host_key_pem: &str, context: ServerContext) -> anyhow::Result<()> {
    let host_key = russh::keys::decode_secret_key(host_key_pem, None)
        .context("unable to parse host key")?;

    let config = Arc::new(russh::server::Config {
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        keys: vec![host_key],
        ..Default::default()
    });

    let context = Arc::new(context);
    let listener = TcpListener::bind(LISTEN_ADDR)
        .await
        .with_context(|| format!("unable to bind {LISTEN_ADDR}"))?;
    info!(addr = LISTEN_ADDR, keys = context.authenticator.key_count(), "osh-server listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "unable to accept connection");
                continue;
            }
        };
        debug!(peer = %peer_addr, "new connection");

        let config = config.clone();
        let handler = ConnectionHandler::new(context.clone(), Some(peer_addr));
        tokio::spawn(async move {
            match russh::server::run_stream(config, stream, handler).await {
                Ok(session) => {
                    if let Err(e) = session.await {
                        debug!(peer = %peer_addr, error = %e, "connection ended with error");
                    }
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "handshake failed");
                }
            }
        });
    }
}
