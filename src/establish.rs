//! Connection establishment over resolved candidates.
//!
//! Candidates are tried in order. For each one a socket is created and the
//! requested action (`bind` for a server, `connect` for a client) is applied.
//! The first candidate for which both steps succeed ends the search. A socket
//! whose action failed is dropped, which closes it, before the next candidate
//! is tried.

use crate::addr::AddressCandidate;
use crate::error::{EstablishmentError, ListenError};
use socket2::{SockAddr, Socket};
use std::fmt;
use std::io;
use std::net::TcpListener;
use tracing::{debug, info, warn};

/// Accepted-but-unprocessed connection queue depth for servers.
pub const DEFAULT_BACKLOG: i32 = 16;

/// Action applied to a freshly created socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishAction {
    /// Assign the candidate as the local address (server).
    Bind,
    /// Connect to the candidate as the remote address (client).
    Connect,
}

impl EstablishAction {
    pub fn name(self) -> &'static str {
        match self {
            EstablishAction::Bind => "bind",
            EstablishAction::Connect => "connect",
        }
    }
}

impl fmt::Display for EstablishAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Socket operations used by the establishment search.
///
/// `SystemTransport` issues real syscalls; tests substitute their own.
pub trait Transport {
    type Socket;

    /// Create a socket matching the candidate's family, type and protocol.
    fn open(&mut self, candidate: &AddressCandidate) -> io::Result<Self::Socket>;

    /// Apply `action` to `socket` using the candidate's address.
    fn apply(
        &mut self,
        socket: &Self::Socket,
        candidate: &AddressCandidate,
        action: EstablishAction,
    ) -> io::Result<()>;
}

/// Transport backed by `socket2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTransport;

impl Transport for SystemTransport {
    type Socket = Socket;

    fn open(&mut self, candidate: &AddressCandidate) -> io::Result<Socket> {
        Socket::new(candidate.family, candidate.socket_type, candidate.protocol)
    }

    fn apply(
        &mut self,
        socket: &Socket,
        candidate: &AddressCandidate,
        action: EstablishAction,
    ) -> io::Result<()> {
        let addr = SockAddr::from(candidate.addr);
        match action {
            EstablishAction::Bind => {
                socket.set_reuse_address(true)?;
                socket.bind(&addr)
            }
            EstablishAction::Connect => socket.connect(&addr),
        }
    }
}

/// Find the first candidate that can be created and bound/connected.
pub fn establish(
    candidates: &[AddressCandidate],
    action: EstablishAction,
) -> Result<Socket, EstablishmentError> {
    establish_with(&mut SystemTransport, candidates, action)
}

/// Establishment search over an arbitrary transport.
pub fn establish_with<T: Transport>(
    transport: &mut T,
    candidates: &[AddressCandidate],
    action: EstablishAction,
) -> Result<T::Socket, EstablishmentError> {
    let mut last_error = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let socket = match transport.open(candidate) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(
                    candidate = index,
                    addr = %candidate.addr,
                    error = %e,
                    "error creating socket"
                );
                last_error = Some(e);
                continue;
            }
        };

        match transport.apply(&socket, candidate, action) {
            Ok(()) => {
                info!(addr = %candidate.addr, %action, "socket established");
                return Ok(socket);
            }
            Err(e) => {
                warn!(
                    candidate = index,
                    addr = %candidate.addr,
                    %action,
                    error = %e,
                    "candidate failed"
                );
                drop(socket);
                last_error = Some(e);
            }
        }
    }

    Err(EstablishmentError {
        action,
        attempts: candidates.len(),
        last_error,
    })
}

/// Mark a bound socket passive and hand it back as a listener.
pub fn listen(socket: Socket, backlog: i32) -> Result<TcpListener, ListenError> {
    socket
        .listen(backlog)
        .map_err(|source| ListenError { backlog, source })?;
    debug!(backlog, "socket marked passive");
    Ok(socket.into())
}
