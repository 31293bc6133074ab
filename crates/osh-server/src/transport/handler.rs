//! Per-connection glue between russh and the channel state machine.
//!
//! russh owns the handshake, crypto, and wire framing, and has already
//! decoded each channel request's payload by the time a handler method
//! runs. The handler normalizes those callbacks into the core's typed
//! [`Request`]s, pairs each with a one-shot [`ReplyHandle`], and feeds
//! them to the per-channel task.

use crate::channel::{self, ChannelContext};
use crate::transport::ServerContext;
use osh_core::identity::EXT_PUBKEY_FINGERPRINT;
use osh_core::{
    short_fingerprint, ChannelRequest, ChannelSink, Identity, OshError, OshResult, ReplyHandle,
    Request,
};
use russh::keys::PublicKey;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Write side of one russh channel.
struct SshChannelSink {
    handle: russh::server::Handle,
    id: ChannelId,
}

impl ChannelSink for SshChannelSink {
    fn send<'a>(
        &'a self,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.handle
                .data(self.id, CryptoVec::from_slice(data))
                .await
                .map_err(|_| OshError::Transport("channel write failed".into()))
        })
    }

    fn exit_status(
        &self,
        code: u32,
    ) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.handle
                .exit_status_request(self.id, code)
                .await
                .map_err(|_| OshError::Transport("exit status send failed".into()))
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.handle
                .close(self.id)
                .await
                .map_err(|_| OshError::Transport("channel close failed".into()))
        })
    }
}

/// One-shot reply over the session handle.
fn reply_handle(handle: russh::server::Handle, id: ChannelId) -> ReplyHandle {
    ReplyHandle::new(move |ok| {
        Box::pin(async move {
            let sent = if ok {
                handle.channel_success(id).await
            } else {
                handle.channel_failure(id).await
            };
            sent.map_err(|_| OshError::Channel("request reply failed".into()))
        })
    })
}

/// Senders feeding one channel's task.
struct ChannelHandles {
    requests: mpsc::Sender<ChannelRequest>,
    data: mpsc::Sender<Vec<u8>>,
}

/// Handler for one authenticated (or authenticating) connection.
pub struct ConnectionHandler {
    context: Arc<ServerContext>,
    peer_addr: Option<SocketAddr>,
    identity: Option<Identity>,
    channels: HashMap<ChannelId, ChannelHandles>,
}

impl ConnectionHandler {
    pub fn new(context: Arc<ServerContext>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            context,
            peer_addr,
            identity: None,
            channels: HashMap::new(),
        }
    }

    /// Forward a decoded request to its channel task.
    ///
    /// A request for a channel we no longer track is negatively
    /// acknowledged here so the peer is never left waiting.
    async fn forward(
        &mut self,
        channel: ChannelId,
        request: Request,
        session: &mut Session,
    ) -> anyhow::Result<()> {
        let Some(handles) = self.channels.get(&channel) else {
            debug!(channel = ?channel, kind = request.kind(), "request on unknown channel");
            session.channel_failure(channel)?;
            return Ok(());
        };
        let reply = reply_handle(session.handle(), channel);
        if handles
            .requests
            .send(ChannelRequest { request, reply })
            .await
            .is_err()
        {
            // Channel task already finished (e.g. closed after exec).
            session.channel_failure(channel)?;
        }
        Ok(())
    }
}

impl Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let key_wire = match public_key.to_bytes() {
            Ok(wire) => wire,
            Err(e) => {
                warn!(user = %user, error = %e, "presented key has no wire encoding");
                return Ok(Auth::Reject {
                    proceed_with_methods: None,
                    partial_success: false,
                });
            }
        };
        match self.context.authenticator.authenticate(user, &key_wire) {
            Ok(permissions) => {
                if let Some(fp) = permissions.extensions.get(EXT_PUBKEY_FINGERPRINT) {
                    info!(
                        user = %user,
                        key = %short_fingerprint(fp),
                        "logged in with public key"
                    );
                }
                self.identity = Some(Identity::new(user, permissions));
                Ok(Auth::Accept)
            }
            Err(e) => {
                warn!(peer = ?self.peer_addr, error = %e, "authentication rejected");
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                    partial_success: false,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let (req_tx, req_rx) = mpsc::channel(16);
        let (data_tx, data_rx) = mpsc::channel(64);
        let sink: Arc<dyn ChannelSink> = Arc::new(SshChannelSink {
            handle: session.handle(),
            id,
        });
        let ctx = ChannelContext {
            identity: self.identity.clone(),
            commands: self.context.commands.clone(),
            subsystems: self.context.subsystems.clone(),
        };
        tokio::spawn(channel::run(req_rx, data_rx, sink, ctx));
        self.channels.insert(
            id,
            ChannelHandles {
                requests: req_tx,
                data: data_tx,
            },
        );
        debug!(channel = ?id, "session channel opened");
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // The wire length prefix is already stripped at this point.
        let command = String::from_utf8_lossy(data).into_owned();
        self.forward(channel, Request::Exec(command), session).await
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, Request::Shell, session).await
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, Request::PtyReq, session).await
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(
            channel,
            Request::Env {
                name: variable_name.to_string(),
                value: variable_value.to_string(),
            },
            session,
        )
        .await
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, Request::Subsystem(name.to_string()), session)
            .await
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(handles) = self.channels.get(&channel) {
            // A full buffer or finished task just drops the bytes.
            let _ = handles.data.send(data.to_vec()).await;
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = ?channel, "channel closed");
        self.channels.remove(&channel);
        Ok(())
    }
}
