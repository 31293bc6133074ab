//! Typed channel requests.
//!
//! Inbound channel requests are decoded once, at the transport boundary,
//! into [`Request`]. String-typed request payloads arrive in SSH wire form
//! (a 4-byte big-endian length prefix followed by the bytes); the stripping
//! lives here and nowhere else.
//!
//! Every request must be answered exactly once. [`ReplyHandle`] enforces
//! this by consuming itself on `accept`/`reject`.

use crate::error::OshResult;
use std::future::Future;
use std::pin::Pin;

/// A typed request delivered on a session channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Run one command line, then close the channel.
    Exec(String),
    /// Willingness to go interactive; does not itself start a terminal.
    Shell,
    /// Allocate a terminal and start the interactive session.
    PtyReq,
    /// Set an environment variable (accepted, not applied).
    Env { name: String, value: String },
    /// Hand the channel to a named subsystem server.
    Subsystem(String),
    /// Anything else; always negatively acknowledged.
    Unknown(String),
}

impl Request {
    /// Decode a raw request frame (request kind plus undecoded payload).
    ///
    /// A payload that does not carry the wire string its kind requires
    /// decodes to [`Request::Unknown`], which the channel loop rejects.
    pub fn decode(kind: &str, payload: &[u8]) -> Request {
        match kind {
            "exec" => match read_string(payload) {
                Some((command, _)) => {
                    Request::Exec(String::from_utf8_lossy(command).into_owned())
                }
                None => Request::Unknown(kind.to_string()),
            },
            "shell" => Request::Shell,
            "pty-req" => Request::PtyReq,
            "env" => match read_string(payload).and_then(|(name, rest)| {
                read_string(rest).map(|(value, _)| (name, value))
            }) {
                Some((name, value)) => Request::Env {
                    name: String::from_utf8_lossy(name).into_owned(),
                    value: String::from_utf8_lossy(value).into_owned(),
                },
                None => Request::Unknown(kind.to_string()),
            },
            "subsystem" => match read_string(payload) {
                Some((name, _)) => {
                    Request::Subsystem(String::from_utf8_lossy(name).into_owned())
                }
                None => Request::Unknown(kind.to_string()),
            },
            other => Request::Unknown(other.to_string()),
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &str {
        match self {
            Request::Exec(_) => "exec",
            Request::Shell => "shell",
            Request::PtyReq => "pty-req",
            Request::Env { .. } => "env",
            Request::Subsystem(_) => "subsystem",
            Request::Unknown(kind) => kind,
        }
    }
}

/// Read one length-prefixed wire string, returning it and the remainder.
fn read_string(payload: &[u8]) -> Option<(&[u8], &[u8])> {
    if payload.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let rest = &payload[4..];
    if rest.len() < len {
        return None;
    }
    Some((&rest[..len], &rest[len..]))
}

type ReplyFuture = Pin<Box<dyn Future<Output = OshResult<()>> + Send>>;

/// One-shot reply to an inbound request.
///
/// Consuming `accept` or `reject` sends the single permitted reply; the
/// move makes a second reply unrepresentable. Dropping a handle without
/// replying stalls the remote peer, so the channel loop must answer every
/// request it takes off the stream.
pub struct ReplyHandle {
    send: Box<dyn FnOnce(bool) -> ReplyFuture + Send>,
}

impl ReplyHandle {
    pub fn new<F>(send: F) -> Self
    where
        F: FnOnce(bool) -> ReplyFuture + Send + 'static,
    {
        Self { send: Box::new(send) }
    }

    /// Acknowledge the request.
    pub async fn accept(self) -> OshResult<()> {
        (self.send)(true).await
    }

    /// Negatively acknowledge the request.
    pub async fn reject(self) -> OshResult<()> {
        (self.send)(false).await
    }
}

/// A decoded request paired with its reply handle.
pub struct ChannelRequest {
    pub request: Request,
    pub reply: ReplyHandle,
}
