//! Interactive terminal session.
//!
//! A cooperative read-eval loop bound to one channel, logically
//! single-threaded: reading the next line is the only suspension point.
//! The server side of the PTY owns echo, so the line reader echoes input
//! and handles backspace itself.

use osh_core::commands::{self, CommandRegistry};
use osh_core::{ChannelSink, Identity};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const PROMPT: &str = "\u{203a} ";

pub struct TerminalSession {
    data: mpsc::Receiver<Vec<u8>>,
    sink: Arc<dyn ChannelSink>,
    identity: Option<Identity>,
    commands: Arc<CommandRegistry>,
    /// Bytes received but not yet consumed by the line reader.
    pending: Vec<u8>,
    /// Line currently being edited.
    line: Vec<u8>,
    /// A `\n` directly after `\r` belongs to the previous line ending.
    swallow_lf: bool,
}

impl TerminalSession {
    pub fn new(
        data: mpsc::Receiver<Vec<u8>>,
        sink: Arc<dyn ChannelSink>,
        identity: Option<Identity>,
        commands: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            data,
            sink,
            identity,
            commands,
            pending: Vec::new(),
            line: Vec::new(),
            swallow_lf: false,
        }
    }

    /// Run the loop until an exit command or a read failure, then let the
    /// channel close.
    pub async fn run(mut self) {
        if self.write_banner().await.is_err() {
            let _ = self.sink.close().await;
            return;
        }

        loop {
            if self.write(PROMPT).await.is_err() {
                break;
            }
            let Some(line) = self.read_line().await else {
                debug!("terminal read failed, closing");
                break;
            };
            if line.is_empty() {
                continue;
            }

            let (command, argument) = commands::parse_line(&line);

            // Bare `echo` is a two-step sub-protocol: prompt, then read the
            // text to echo as one extra line.
            let output = if command == "echo" && argument.is_empty() {
                if self.write("Enter text to echo: ").await.is_err() {
                    break;
                }
                let Some(text) = self.read_line().await else {
                    break;
                };
                self.commands.dispatch(self.identity.as_ref(), "echo", &text)
            } else {
                self.commands
                    .dispatch(self.identity.as_ref(), command, argument)
            };

            if self.write(&output).await.is_err() {
                break;
            }
            if command == "exit" {
                // Clean, requested termination.
                break;
            }
        }

        let _ = self.sink.close().await;
    }

    async fn write_banner(&self) -> osh_core::OshResult<()> {
        let greeting = match &self.identity {
            Some(id) if !id.username.is_empty() => {
                format!("Welcome to osh, {}\n", id.username)
            }
            _ => "Welcome to osh\n".to_string(),
        };
        self.write(&greeting).await?;
        self.write("Type 'exit' to close the connection\n").await?;
        self.write("Type 'help' to see all available commands\n").await
    }

    /// Write text, converting bare newlines to CRLF for the terminal.
    async fn write(&self, text: &str) -> osh_core::OshResult<()> {
        let bytes = text.replace('\n', "\r\n").into_bytes();
        self.sink.send(&bytes).await
    }

    /// Read one line, echoing as we go. `None` means the peer went away.
    async fn read_line(&mut self) -> Option<String> {
        loop {
            // Consume buffered bytes first.
            let mut echo = Vec::new();
            let mut finished = None;
            let mut eof = false;
            let mut consumed = 0;
            for (i, &byte) in self.pending.iter().enumerate() {
                consumed = i + 1;
                if self.swallow_lf {
                    self.swallow_lf = false;
                    if byte == b'\n' {
                        continue;
                    }
                }
                match byte {
                    b'\r' | b'\n' => {
                        self.swallow_lf = byte == b'\r';
                        echo.extend_from_slice(b"\r\n");
                        finished = Some(std::mem::take(&mut self.line));
                        break;
                    }
                    0x7f | 0x08 => {
                        if self.line.pop().is_some() {
                            echo.extend_from_slice(b"\x08 \x08");
                        }
                    }
                    // Ctrl-C: discard the line under edit.
                    0x03 => {
                        self.line.clear();
                        echo.extend_from_slice(b"^C\r\n");
                        finished = Some(Vec::new());
                        break;
                    }
                    // Ctrl-D on an empty line ends the session.
                    0x04 if self.line.is_empty() => {
                        eof = true;
                        break;
                    }
                    b if b >= 0x20 => {
                        self.line.push(b);
                        echo.push(b);
                    }
                    _ => {}
                }
            }
            self.pending.drain(..consumed);
            if eof {
                return None;
            }

            if !echo.is_empty() && self.sink.send(&echo).await.is_err() {
                return None;
            }
            if let Some(line) = finished {
                return Some(String::from_utf8_lossy(&line).into_owned());
            }

            // Need more input; this is the loop's suspension point.
            match self.data.recv().await {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osh_core::{OshResult, Permissions};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Sink that records everything written to it.
    #[derive(Default)]
    struct RecordingSink {
        written: Mutex<Vec<u8>>,
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
            _code: u32,
        ) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self) -> Pin<Box<dyn Future<Output = OshResult<()>> + Send + '_>> {
            Box::pin(async move {
                self.closed.store(true, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn session(
        input: &[&[u8]],
    ) -> (TerminalSession, Arc<RecordingSink>) {
        let (tx, rx) = mpsc::channel(16);
        for chunk in input {
            tx.try_send(chunk.to_vec()).unwrap();
        }
        drop(tx);
        let sink = Arc::new(RecordingSink::default());
        let identity = Identity::new("alice", Permissions::default());
        let terminal = TerminalSession::new(
            rx,
            sink.clone(),
            Some(identity),
            Arc::new(CommandRegistry::builtin()),
        );
        (terminal, sink)
    }

    #[tokio::test]
    async fn banner_then_exit() {
        let (terminal, sink) = session(&[b"exit\r"]);
        terminal.run().await;
        let out = sink.output();
        assert!(out.contains("Welcome to osh, alice"));
        assert!(out.contains("Bye"));
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dispatches_command_lines() {
        let (terminal, sink) = session(&[b"whoami\r", b"exit\r"]);
        terminal.run().await;
        assert!(sink.output().contains("You are alice"));
    }

    #[tokio::test]
    async fn read_failure_ends_session() {
        // Input ends without an exit command.
        let (terminal, sink) = session(&[b"pw"]);
        terminal.run().await;
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn backspace_edits_line() {
        let (terminal, sink) = session(&[b"whoamix\x7f\r", b"exit\r"]);
        terminal.run().await;
        assert!(sink.output().contains("You are alice"));
    }

    #[tokio::test]
    async fn bare_echo_prompts_for_second_line() {
        let (terminal, sink) = session(&[b"echo\r", b"hello there\r", b"exit\r"]);
        terminal.run().await;
        let out = sink.output();
        assert!(out.contains("Enter text to echo: "));
        assert!(out.contains("You echoed: hello there"));
    }

    #[tokio::test]
    async fn echo_with_argument_skips_prompt() {
        let (terminal, sink) = session(&[b"echo hi\r", b"exit\r"]);
        terminal.run().await;
        let out = sink.output();
        assert!(!out.contains("Enter text to echo: "));
        assert!(out.contains("You echoed: hi"));
    }

    #[tokio::test]
    async fn crlf_is_one_line_ending() {
        let (terminal, sink) = session(&[b"whoami\r\n", b"exit\r\n"]);
        terminal.run().await;
        let out = sink.output();
        assert_eq!(out.matches("You are alice").count(), 1);
    }

    #[tokio::test]
    async fn anonymous_identity_gets_generic_banner() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(b"exit\r".to_vec()).unwrap();
        drop(tx);
        let sink = Arc::new(RecordingSink::default());
        let terminal =
            TerminalSession::new(rx, sink.clone(), None, Arc::new(CommandRegistry::builtin()));
        terminal.run().await;
        let out = sink.output();
        assert!(out.contains("Welcome to osh\r\n"));
        assert!(!out.contains("Welcome to osh,"));
    }
}
