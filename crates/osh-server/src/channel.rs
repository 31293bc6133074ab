//! Per-channel request state machine.
//!
//! Each session channel runs one instance of [`run`] in its own task,
//! consuming the channel's request stream in order. Every request taken
//! off the stream is replied to exactly once; a write or reply failure
//! tears down this channel only.

use crate::subsystem::{SubsystemIo, SubsystemRegistry};
use crate::terminal::TerminalSession;
use osh_core::commands::{self, CommandRegistry};
use osh_core::{ChannelRequest, ChannelSink, Identity, Request};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lifecycle of one session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Accepting requests, nothing granted yet.
    Open,
    /// A `shell` request was acknowledged; interactive mode may follow.
    ShellGranted,
    /// An interactive terminal loop owns the channel's data stream.
    TerminalActive,
    /// Terminal state reached after `exec` completes; nothing further runs.
    Closed,
}

/// Shared context a channel task needs to serve requests.
pub struct ChannelContext {
    pub identity: Option<Identity>,
    pub commands: Arc<CommandRegistry>,
    pub subsystems: Arc<SubsystemRegistry>,
}

/// Drive one channel until its request stream ends or a terminal
/// transition closes it.
pub async fn run(
    mut requests: mpsc::Receiver<ChannelRequest>,
    data: mpsc::Receiver<Vec<u8>>,
    sink: Arc<dyn ChannelSink>,
    ctx: ChannelContext,
) -> ChannelState {
    let mut state = ChannelState::Open;
    // Moved out once, to the terminal loop or a subsystem server.
    let mut data = Some(data);

    while let Some(ChannelRequest { request, reply }) = requests.recv().await {
        debug!(kind = request.kind(), "channel request");
        match request {
            Request::Exec(line) => {
                let (command, argument) = commands::parse_line(&line);
                let output = ctx.commands.dispatch(ctx.identity.as_ref(), command, argument);
                if let Err(e) = sink.send(output.as_bytes()).await {
                    warn!(error = %e, "exec output write failed");
                    break;
                }
                if let Err(e) = sink.exit_status(0).await {
                    warn!(error = %e, "exit status write failed");
                    break;
                }
                if reply.accept().await.is_err() {
                    break;
                }
                let _ = sink.close().await;
                state = ChannelState::Closed;
                // Terminal transition: anything still queued is never processed.
                break;
            }
            Request::Shell => {
                // Signals willingness only; the terminal starts on pty-req.
                if reply.accept().await.is_err() {
                    break;
                }
                if state == ChannelState::Open {
                    state = ChannelState::ShellGranted;
                }
            }
            Request::PtyReq => {
                if reply.accept().await.is_err() {
                    break;
                }
                // Idempotent-once: a repeated pty-req must not start a
                // second concurrent terminal loop on this channel.
                if state != ChannelState::TerminalActive {
                    if let Some(rx) = data.take() {
                        let terminal = TerminalSession::new(
                            rx,
                            sink.clone(),
                            ctx.identity.clone(),
                            ctx.commands.clone(),
                        );
                        tokio::spawn(terminal.run());
                        state = ChannelState::TerminalActive;
                    }
                }
            }
            Request::Env { name, value } => {
                debug!(%name, %value, "environment variable accepted, not applied");
                if reply.accept().await.is_err() {
                    break;
                }
            }
            Request::Subsystem(name) => {
                match (ctx.subsystems.get(&name), data.take()) {
                    (Some(server), Some(rx)) => {
                        if reply.accept().await.is_err() {
                            break;
                        }
                        debug!(%name, "channel handed to subsystem");
                        let io = SubsystemIo {
                            data: rx,
                            sink: sink.clone(),
                            identity: ctx.identity.clone(),
                        };
                        tokio::spawn(async move {
                            if let Err(e) = server.serve(io).await {
                                warn!(error = %e, "subsystem server failed");
                            }
                        });
                    }
                    (_, rx) => {
                        // Unsupported name, or the data stream is already
                        // owned by a terminal or another subsystem.
                        data = rx;
                        debug!(%name, "subsystem rejected");
                        if reply.reject().await.is_err() {
                            break;
                        }
                    }
                }
            }
            Request::Unknown(kind) => {
                debug!(%kind, "rejecting unsupported request");
                if reply.reject().await.is_err() {
                    break;
                }
            }
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystem::{Subsystem, SubsystemIo};
    use osh_core::{OshResult, Permissions, ReplyHandle};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sink that records writes, exit statuses, and closes.
    #[derive(Default)]
    struct RecordingSink {
        written: Mutex<Vec<u8>>,
        exit_status: Mutex<Option<u32>>,
        closed: AtomicBool,
    }

    impl RecordingSink {
        fn output(&self) -> String {
            String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
        }
    }

    impl ChannelSink for RecordingSink {
        fn send<'a>(
            &'a self,
            data: &'a [u8],
        ) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + 'a>> {
            Box::pin(async move {
                self.written.lock().unwrap().extend_from_slice(data);
                Ok(())
            })
        }

        fn exit_status(
            &self,
            code: u32,
        ) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + '_>> {
            Box::pin(async move {
                *self.exit_status.lock().unwrap() = Some(code);
                Ok(())
            })
        }

        fn close(&self) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + '_>> {
            Box::pin(async move {
                self.closed.store(true, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn recording_reply(verdicts: mpsc::UnboundedSender<bool>) -> ReplyHandle {
        ReplyHandle::new(move |ok| {
            Box::pin(async move {
                let _ = verdicts.send(ok);
                Ok(())
            })
        })
    }

    struct Harness {
        requests: mpsc::Sender<ChannelRequest>,
        data: mpsc::Sender<Vec<u8>>,
        verdicts: mpsc::UnboundedReceiver<bool>,
        verdict_tx: mpsc::UnboundedSender<bool>,
        sink: Arc<RecordingSink>,
        task: tokio::task::JoinHandle<ChannelState>,
    }

    impl Harness {
        fn new(subsystems: SubsystemRegistry) -> Self {
            let (req_tx, req_rx) = mpsc::channel(16);
            let (data_tx, data_rx) = mpsc::channel(16);
            let (verdict_tx, verdicts) = mpsc::unbounded_channel();
            let sink = Arc::new(RecordingSink::default());
            let ctx = ChannelContext {
                identity: Some(Identity::new("alice", Permissions::default())),
                commands: Arc::new(CommandRegistry::builtin()),
                subsystems: Arc::new(subsystems),
            };
            let task = tokio::spawn(run(req_rx, data_rx, sink.clone(), ctx));
            Self {
                requests: req_tx,
                data: data_tx,
                verdicts,
                verdict_tx,
                sink,
                task,
            }
        }

        async fn send(&self, request: Request) {
            // Best effort: a channel that already reached its terminal
            // state drops its receiver, and anything sent after that is
            // exactly the "never processed" case the tests assert on.
            let _ = self
                .requests
                .send(ChannelRequest {
                    request,
                    reply: recording_reply(self.verdict_tx.clone()),
                })
                .await;
        }

        async fn finish(self) -> (ChannelState, Arc<RecordingSink>, Vec<bool>) {
            drop(self.requests);
            drop(self.verdict_tx);
            let state = self.task.await.expect("channel task panicked");
            let mut verdicts = Vec::new();
            let mut rx = self.verdicts;
            while let Some(v) = rx.recv().await {
                verdicts.push(v);
            }
            (state, self.sink, verdicts)
        }
    }

    async fn wait_closed(sink: &RecordingSink) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !sink.closed.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("channel never closed");
    }

    #[tokio::test]
    async fn exec_writes_output_status_and_closes() {
        let h = Harness::new(SubsystemRegistry::new());
        h.send(Request::Exec("echo hi".into())).await;
        let (state, sink, verdicts) = h.finish().await;
        assert_eq!(state, ChannelState::Closed);
        assert_eq!(sink.output(), "You echoed: hi\n");
        assert_eq!(*sink.exit_status.lock().unwrap(), Some(0));
        assert!(sink.closed.load(Ordering::SeqCst));
        assert_eq!(verdicts, vec![true]);
    }

    #[tokio::test]
    async fn requests_after_exec_are_never_processed() {
        let h = Harness::new(SubsystemRegistry::new());
        h.send(Request::Exec("pwd".into())).await;
        h.send(Request::Shell).await;
        h.send(Request::Exec("whoami".into())).await;
        let (state, sink, verdicts) = h.finish().await;
        assert_eq!(state, ChannelState::Closed);
        // Only the first exec got a reply; nothing after it ran.
        assert_eq!(verdicts, vec![true]);
        assert!(!sink.output().contains("You are"));
    }

    #[tokio::test]
    async fn exec_decoded_from_raw_frame() {
        // As delivered on the wire: 4-byte length prefix, then the command.
        let mut payload = (3u32.to_be_bytes()).to_vec();
        payload.extend_from_slice(b"pwd");
        let h = Harness::new(SubsystemRegistry::new());
        h.send(Request::decode("exec", &payload)).await;
        let (state, sink, _) = h.finish().await;
        assert_eq!(state, ChannelState::Closed);
        assert!(sink.output().ends_with('\n'));
        assert_ne!(sink.output(), "Unknown command\n");
    }

    #[tokio::test]
    async fn shell_ack_alone_does_not_start_terminal() {
        let h = Harness::new(SubsystemRegistry::new());
        h.send(Request::Shell).await;
        let (state, sink, verdicts) = h.finish().await;
        assert_eq!(state, ChannelState::ShellGranted);
        assert_eq!(verdicts, vec![true]);
        assert!(sink.output().is_empty());
    }

    #[tokio::test]
    async fn interactive_session_end_to_end() {
        let h = Harness::new(SubsystemRegistry::new());
        h.send(Request::Shell).await;
        h.send(Request::PtyReq).await;
        h.data.send(b"help\r".to_vec()).await.unwrap();
        h.data.send(b"exit\r".to_vec()).await.unwrap();
        let (state, sink, verdicts) = h.finish().await;
        assert_eq!(state, ChannelState::TerminalActive);
        assert_eq!(verdicts, vec![true, true]);
        wait_closed(&sink).await;
        let out = sink.output();
        assert!(out.contains("Welcome to osh, alice"));
        for name in ["pwd", "ls", "cat", "echo", "clear", "exit", "help", "whoami"] {
            assert!(out.contains(name), "help listing missing {name}");
        }
        assert!(out.contains("Bye"));
    }

    #[tokio::test]
    async fn repeated_pty_req_starts_one_terminal() {
        let h = Harness::new(SubsystemRegistry::new());
        h.send(Request::PtyReq).await;
        h.send(Request::PtyReq).await;
        h.data.send(b"exit\r".to_vec()).await.unwrap();
        let (state, sink, verdicts) = h.finish().await;
        assert_eq!(state, ChannelState::TerminalActive);
        // Both acknowledged, one welcome banner.
        assert_eq!(verdicts, vec![true, true]);
        wait_closed(&sink).await;
        assert_eq!(sink.output().matches("Welcome to osh").count(), 1);
    }

    #[tokio::test]
    async fn env_is_acknowledged_without_state_change() {
        let h = Harness::new(SubsystemRegistry::new());
        h.send(Request::Env {
            name: "LANG".into(),
            value: "C".into(),
        })
        .await;
        let (state, sink, verdicts) = h.finish().await;
        assert_eq!(state, ChannelState::Open);
        assert_eq!(verdicts, vec![true]);
        assert!(sink.output().is_empty());
    }

    #[tokio::test]
    async fn unknown_request_is_rejected_channel_stays_open() {
        let h = Harness::new(SubsystemRegistry::new());
        h.send(Request::Unknown("x11-req".into())).await;
        h.send(Request::Shell).await;
        let (state, _, verdicts) = h.finish().await;
        assert_eq!(state, ChannelState::ShellGranted);
        assert_eq!(verdicts, vec![false, true]);
    }

    /// Subsystem that echoes one inbound chunk back through the sink.
    struct EchoSubsystem;

    impl Subsystem for EchoSubsystem {
        fn serve(
            &self,
            mut io: SubsystemIo,
        ) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + '_>> {
            Box::pin(async move {
                if let Some(chunk) = io.data.recv().await {
                    io.sink.send(&chunk).await?;
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn supported_subsystem_is_handed_the_channel() {
        let mut subsystems = SubsystemRegistry::new();
        subsystems.register("xfer", Arc::new(EchoSubsystem));
        let h = Harness::new(subsystems);
        h.send(Request::Subsystem("xfer".into())).await;
        h.data.send(b"payload".to_vec()).await.unwrap();
        let (_, sink, verdicts) = h.finish().await;
        assert_eq!(verdicts, vec![true]);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !sink.output().contains("payload") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subsystem never echoed");
    }

    #[tokio::test]
    async fn unsupported_subsystem_is_rejected() {
        let h = Harness::new(SubsystemRegistry::new());
        h.send(Request::Subsystem("sftp".into())).await;
        h.send(Request::Shell).await;
        let (state, _, verdicts) = h.finish().await;
        assert_eq!(state, ChannelState::ShellGranted);
        assert_eq!(verdicts, vec![false, true]);
    }
}
