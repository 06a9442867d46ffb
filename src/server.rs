//! Single-client TCP echo server.
//!
//! Accepts one connection at a time and runs the echo cycle on it until the
//! client closes. Further clients wait in the listen backlog meanwhile.

use crate::addr::{identify, resolve, Endpoint, Peer};
use crate::config::Config;
use crate::error::{AcceptError, Result, SessionError};
use crate::establish::{establish, listen, EstablishAction, DEFAULT_BACKLOG};
use crate::session::{echo_cycle, SessionEnd};
use crate::transform::{LineTransform, Uppercase};
use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Server instance
pub struct Server<T = Uppercase> {
    listener: TcpListener,
    transform: T,
}

impl Server<Uppercase> {
    /// Bind the configured port with the default uppercase transform.
    pub fn bind(config: &Config) -> Result<Self> {
        Self::bind_with(config, Uppercase)
    }
}

impl<T: LineTransform> Server<T> {
    /// Resolve, bind and listen on the configured port.
    ///
    /// Any failure here is fatal for the server.
    pub fn bind_with(config: &Config, transform: T) -> Result<Self> {
        let candidates = resolve(&Endpoint::local(config.port.as_str()))?;
        let socket = establish(&candidates, EstablishAction::Bind)?;
        let listener = listen(socket, DEFAULT_BACKLOG)?;

        info!(
            address = %listener.local_addr()?,
            backlog = DEFAULT_BACKLOG,
            "Server listening"
        );

        Ok(Self::from_listener(listener, transform))
    }

    /// Wrap a listener that is already bound and passive.
    pub fn from_listener(listener: TcpListener, transform: T) -> Self {
        Self {
            listener,
            transform,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve clients one after another, forever.
    pub fn run(&self) -> ! {
        loop {
            // Accept failures are already logged; just wait for the next client.
            let _ = self.serve_one();
        }
    }

    /// Accept one client and serve it until the session closes.
    pub fn serve_one(&self) -> std::result::Result<SessionEnd, AcceptError> {
        let (stream, addr) = self.listener.accept().map_err(|e| {
            warn!(error = %e, "Failed to accept connection");
            AcceptError(e)
        })?;

        let peer = identify_peer(&addr);
        info!(%peer, "New connection");

        let end = serve_connection(stream, &peer, &self.transform);
        match &end {
            SessionEnd::PeerClosed => debug!(%peer, "Session finished"),
            SessionEnd::Failed(e) => warn!(%peer, error = %e, "Session aborted"),
        }
        Ok(end)
    }
}

/// Reverse-resolve the peer, falling back to an unnamed identity.
fn identify_peer(addr: &SocketAddr) -> Peer {
    match identify(addr) {
        Ok(peer) => peer,
        Err(e) => {
            let peer = Peer::unnamed(addr.port());
            warn!(%peer, error = %e, "Could not identify peer");
            peer
        }
    }
}

fn serve_connection<T>(stream: TcpStream, peer: &Peer, transform: &T) -> SessionEnd
where
    T: LineTransform + ?Sized,
{
    let mut reader = match stream.try_clone() {
        Ok(read_half) => BufReader::new(read_half),
        Err(e) => return SessionEnd::Failed(SessionError::Read(e)),
    };
    let mut writer = stream;

    let end = echo_cycle(&mut reader, &mut writer, transform, peer);

    // The peer may already be gone; both handles close on drop regardless.
    let _ = writer.shutdown(Shutdown::Both);
    end
}
