//! Line-oriented session loops.
//!
//! A session owns one connection from first I/O to final close. Both loops
//! keep a single growable line buffer for the whole session and stop on the
//! first empty or failed read, never touching the connection afterwards.
//!
//! ## Server: echo cycle
//!
//! ```text
//! read line ──EOF/error──▶ closed by peer
//!     │
//!     ▼
//! transform in place ──▶ write whole line ──▶ read line ...
//! ```
//!
//! ## Client: request/response
//!
//! ```text
//! Prompt ──EOF──▶ ClosedLocal
//!   │
//!   ▼
//! Send ──▶ Receive ──EOF/error──▶ ClosedPeer
//!            │
//!            └──▶ Prompt
//! ```

use crate::addr::Peer;
use crate::error::SessionError;
use crate::transform::{Identity, LineTransform};
use std::io::{self, BufRead, Write};
use tracing::{debug, info};

/// Initial line buffer capacity; the buffer grows on demand.
pub const LINE_CAPACITY: usize = 64;

/// Report written when local input ends.
pub const CLOSED_LOCALLY: &str = "connection closed locally";

/// Report written when the server closes the connection.
pub const CLOSED_BY_FOREIGN_HOST: &str = "connection closed by foreign host";

const BANNER: &str = "Escape character is 'C-d'.\n";
const PROMPT: &str = ">>> ";

/// How a server session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client closed its side (or the read failed).
    PeerClosed,
    /// Writing the response failed.
    Failed(SessionError),
}

/// Drive one accepted connection through read-transform-write until the
/// peer closes.
///
/// Each response has exactly the byte count of the request it answers,
/// terminator included.
pub fn echo_cycle<R, W, T>(
    reader: &mut R,
    writer: &mut W,
    transform: &T,
    peer: &Peer,
) -> SessionEnd
where
    R: BufRead,
    W: Write,
    T: LineTransform + ?Sized,
{
    let mut line = Vec::with_capacity(LINE_CAPACITY);

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                info!(%peer, "connection closed by peer");
                return SessionEnd::PeerClosed;
            }
            Ok(_) => {}
            Err(e) => {
                info!(%peer, error = %e, "connection closed by peer");
                return SessionEnd::PeerClosed;
            }
        }

        info!(%peer, "read: {}", String::from_utf8_lossy(trim_terminator(&line)));

        transform.apply(&mut line);

        if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
            debug!(%peer, error = %e, "response write failed");
            return SessionEnd::Failed(SessionError::Write(e));
        }
    }
}

/// Strip a trailing `\n` or `\r\n`.
fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// How a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientClosure {
    /// Local input reached end of file.
    Local,
    /// The server closed the connection while a response was awaited.
    ForeignHost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Prompt,
    Send,
    Receive,
    ClosedLocal,
    ClosedPeer,
}

/// Strict one-request-one-response client loop.
///
/// Lines come from `input`, responses pass through `transform` (identity by
/// default) and go to `output` with the closure report, and the interactive
/// prompt goes to `prompt`.
pub struct RequestLoop<I, O, P, T = Identity> {
    input: I,
    output: O,
    prompt: P,
    transform: T,
    line: Vec<u8>,
}

impl<I, O, P> RequestLoop<I, O, P> {
    pub fn new(input: I, output: O, prompt: P) -> Self {
        Self {
            input,
            output,
            prompt,
            transform: Identity,
            line: Vec::with_capacity(LINE_CAPACITY),
        }
    }
}

impl<I, O, P, T> RequestLoop<I, O, P, T> {
    /// Replace the transform applied to each response before it is shown.
    pub fn with_transform<U>(self, transform: U) -> RequestLoop<I, O, P, U> {
        RequestLoop {
            input: self.input,
            output: self.output,
            prompt: self.prompt,
            transform,
            line: self.line,
        }
    }

    /// Give back the output sink.
    pub fn into_output(self) -> O {
        self.output
    }
}

impl<I, O, P, T> RequestLoop<I, O, P, T>
where
    I: BufRead,
    O: Write,
    P: Write,
    T: LineTransform,
{
    /// Run until local input ends or the server closes the connection.
    ///
    /// A send rejected because the server already went away ends the loop
    /// like an end of stream. Any other send failure, or a failed write to
    /// `output`, is an error.
    pub fn run<R, W>(
        &mut self,
        conn_reader: &mut R,
        conn_writer: &mut W,
    ) -> Result<ClientClosure, SessionError>
    where
        R: BufRead,
        W: Write,
    {
        self.show(BANNER);
        let mut state = ClientState::Prompt;

        loop {
            state = match state {
                ClientState::Prompt => {
                    self.show(PROMPT);
                    self.line.clear();
                    match self.input.read_until(b'\n', &mut self.line) {
                        // A final line without terminator counts as end of input.
                        Ok(_) if self.line.ends_with(b"\n") => ClientState::Send,
                        Ok(_) => ClientState::ClosedLocal,
                        Err(e) => {
                            debug!(error = %e, "input read failed");
                            ClientState::ClosedLocal
                        }
                    }
                }
                ClientState::Send => {
                    match conn_writer
                        .write_all(&self.line)
                        .and_then(|()| conn_writer.flush())
                    {
                        Ok(()) => ClientState::Receive,
                        Err(e) if is_peer_gone(&e) => {
                            debug!(error = %e, "request send failed");
                            ClientState::ClosedPeer
                        }
                        Err(e) => return Err(SessionError::Write(e)),
                    }
                }
                ClientState::Receive => {
                    self.line.clear();
                    match conn_reader.read_until(b'\n', &mut self.line) {
                        Ok(0) => ClientState::ClosedPeer,
                        Ok(_) => {
                            self.transform.apply(&mut self.line);
                            self.output
                                .write_all(&self.line)
                                .and_then(|()| self.output.flush())
                                .map_err(SessionError::Write)?;
                            if self.line.ends_with(b"\n") {
                                ClientState::Prompt
                            } else {
                                ClientState::ClosedPeer
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "response read failed");
                            ClientState::ClosedPeer
                        }
                    }
                }
                ClientState::ClosedLocal => {
                    self.show("\n");
                    self.report(CLOSED_LOCALLY)?;
                    return Ok(ClientClosure::Local);
                }
                ClientState::ClosedPeer => {
                    self.show("\n");
                    self.report(CLOSED_BY_FOREIGN_HOST)?;
                    return Ok(ClientClosure::ForeignHost);
                }
            };
        }
    }

    fn show(&mut self, text: &str) {
        // Prompt write failures are ignored.
        let _ = self
            .prompt
            .write_all(text.as_bytes())
            .and_then(|()| self.prompt.flush());
    }

    fn report(&mut self, message: &str) -> Result<(), SessionError> {
        info!("{message}");
        writeln!(self.output, "{message}")
            .and_then(|()| self.output.flush())
            .map_err(SessionError::Write)
    }
}

/// Send failures that mean the server closed or reset the connection.
fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Uppercase;
    use std::io::{self, BufReader, Cursor, Read};
    use std::sync::{Arc, Mutex};

    fn peer() -> Peer {
        Peer::unnamed(4242)
    }

    fn client(input: &[u8]) -> RequestLoop<Cursor<Vec<u8>>, Vec<u8>, io::Sink> {
        RequestLoop::new(Cursor::new(input.to_vec()), Vec::new(), io::sink())
    }

    /// Canned server responses, followed by end of stream.
    fn responses(lines: &[&str]) -> Cursor<Vec<u8>> {
        Cursor::new(lines.concat().into_bytes())
    }

    #[test]
    fn test_echo_cycle_uppercases_each_line() {
        let mut reader = Cursor::new(b"hello\nMix3d CaSe\n".to_vec());
        let mut writer: Vec<u8> = Vec::new();

        let end = echo_cycle(&mut reader, &mut writer, &Uppercase, &peer());

        assert!(matches!(end, SessionEnd::PeerClosed));
        assert_eq!(writer, b"HELLO\nMIX3D CASE\n");
    }

    #[test]
    fn test_echo_cycle_preserves_length() {
        let request = b"a\xffb\r\n\n".to_vec();
        let mut reader = Cursor::new(request.clone());
        let mut writer: Vec<u8> = Vec::new();

        echo_cycle(&mut reader, &mut writer, &Uppercase, &peer());

        assert_eq!(writer.len(), request.len());
        assert_eq!(writer, b"A\xffB\r\n\n");
    }

    #[test]
    fn test_echo_cycle_empty_input() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let mut writer: Vec<u8> = Vec::new();

        let end = echo_cycle(&mut reader, &mut writer, &Identity, &peer());

        assert!(matches!(end, SessionEnd::PeerClosed));
        assert!(writer.is_empty());
    }

    /// Writer whose every write fails with the given kind.
    struct FailingWriter(io::ErrorKind);

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(self.0, "write refused"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_echo_cycle_write_failure_ends_session() {
        let mut reader = Cursor::new(b"one\ntwo\n".to_vec());

        let mut writer = FailingWriter(io::ErrorKind::BrokenPipe);

        let end = echo_cycle(&mut reader, &mut writer, &Uppercase, &peer());

        assert!(matches!(end, SessionEnd::Failed(SessionError::Write(_))));
        // The second line is never read.
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "two\n");
    }

    #[test]
    fn test_client_closed_locally() {
        let mut session = client(b"hello\n");
        let mut conn_reader = responses(&["HELLO\n"]);
        let mut sent: Vec<u8> = Vec::new();

        let closure = session.run(&mut conn_reader, &mut sent).unwrap();

        assert_eq!(closure, ClientClosure::Local);
        assert_eq!(sent, b"hello\n");
        let output = String::from_utf8(session.into_output()).unwrap();
        assert_eq!(output, "HELLO\nconnection closed locally\n");
    }

    #[test]
    fn test_client_never_sends_partial_line() {
        let mut session = client(b"one\ntrailing");
        let mut conn_reader = responses(&["ONE\n"]);
        let mut sent: Vec<u8> = Vec::new();

        let closure = session.run(&mut conn_reader, &mut sent).unwrap();

        assert_eq!(closure, ClientClosure::Local);
        assert_eq!(sent, b"one\n");
        let output = String::from_utf8(session.into_output()).unwrap();
        assert_eq!(output.matches(CLOSED_LOCALLY).count(), 1);
    }

    #[test]
    fn test_client_closed_by_foreign_host() {
        let mut session = client(b"first\nsecond\nthird\n");
        let mut conn_reader = responses(&["FIRST\n"]);
        let mut sent: Vec<u8> = Vec::new();

        let closure = session.run(&mut conn_reader, &mut sent).unwrap();

        assert_eq!(closure, ClientClosure::ForeignHost);
        // Strict request/response: the third line is never sent.
        assert_eq!(sent, b"first\nsecond\n");
        let output = String::from_utf8(session.into_output()).unwrap();
        assert_eq!(output, "FIRST\nconnection closed by foreign host\n");
    }

    #[test]
    fn test_client_send_failure_is_error() {
        let mut session = client(b"hi\n");
        let mut conn_reader = responses(&[]);
        let mut writer = FailingWriter(io::ErrorKind::PermissionDenied);

        let result = session.run(&mut conn_reader, &mut writer);

        assert!(matches!(result, Err(SessionError::Write(_))));
    }

    #[test]
    fn test_client_send_to_reset_peer_is_foreign_close() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
        ] {
            let mut session = client(b"hi\nagain\n");
            let mut conn_reader = responses(&[]);
            let mut writer = FailingWriter(kind);

            let closure = session.run(&mut conn_reader, &mut writer).unwrap();

            assert_eq!(closure, ClientClosure::ForeignHost);
            let output = String::from_utf8(session.into_output()).unwrap();
            assert_eq!(output, format!("{CLOSED_BY_FOREIGN_HOST}\n"));
        }
    }

    #[test]
    fn test_client_applies_transform_to_responses() {
        struct Stars;

        impl LineTransform for Stars {
            fn apply(&self, line: &mut [u8]) {
                for byte in line.iter_mut().filter(|b| b.is_ascii_alphabetic()) {
                    *byte = b'*';
                }
            }
        }

        let mut session = client(b"abc\n").with_transform(Stars);
        let mut conn_reader = responses(&["ABC\n"]);
        let mut sent: Vec<u8> = Vec::new();

        session.run(&mut conn_reader, &mut sent).unwrap();

        assert_eq!(sent, b"abc\n");
        let output = String::from_utf8(session.into_output()).unwrap();
        assert_eq!(output, format!("***\n{CLOSED_LOCALLY}\n"));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_echo_cycle_logs_each_read() {
        let logs = CapturedLogs::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .finish();

        let mut reader = Cursor::new(b"hello\n".to_vec());
        let mut writer: Vec<u8> = Vec::new();
        tracing::subscriber::with_default(subscriber, || {
            echo_cycle(&mut reader, &mut writer, &Uppercase, &peer());
        });

        let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("read: hello"), "logs: {logs}");
        assert!(logs.contains("connection closed by peer"), "logs: {logs}");
        assert_eq!(writer, b"HELLO\n");
    }

    #[test]
    fn test_client_prompt() {
        let mut prompt: Vec<u8> = Vec::new();
        let mut session =
            RequestLoop::new(Cursor::new(b"x\n".to_vec()), Vec::<u8>::new(), &mut prompt);
        let mut conn_reader = BufReader::new(&b"X\n"[..]);

        session.run(&mut conn_reader, &mut Vec::<u8>::new()).unwrap();
        drop(session);

        assert_eq!(
            String::from_utf8(prompt).unwrap(),
            "Escape character is 'C-d'.\n>>> >>> \n"
        );
    }

    #[test]
    fn test_trim_terminator() {
        assert_eq!(trim_terminator(b"abc\r\n"), b"abc");
        assert_eq!(trim_terminator(b"abc\n"), b"abc");
        assert_eq!(trim_terminator(b"abc"), b"abc");
    }
}
