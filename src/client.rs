//! Interactive line client.

use crate::addr::{resolve, Endpoint};
use crate::config::Config;
use crate::error::Result;
use crate::establish::{establish, EstablishAction};
use crate::session::{ClientClosure, RequestLoop};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::info;

/// Connected client.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    /// Resolve and connect to the configured port on the local host.
    pub fn connect(config: &Config) -> Result<Self> {
        let candidates = resolve(&Endpoint::local(config.port.as_str()))?;
        let socket = establish(&candidates, EstablishAction::Connect)?;
        let stream: TcpStream = socket.into();

        info!(port = %config.port, "connected");
        Ok(Self { stream })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Run the request/response loop over the given sinks, then close.
    pub fn run<I, O, P>(self, input: I, output: O, prompt: P) -> Result<ClientClosure>
    where
        I: BufRead,
        O: Write,
        P: Write,
    {
        let mut reader = BufReader::new(self.stream.try_clone()?);
        let mut writer = self.stream;

        let closure = RequestLoop::new(input, output, prompt).run(&mut reader, &mut writer)?;

        let _ = writer.shutdown(Shutdown::Both);
        Ok(closure)
    }

    /// Run against the terminal: stdin in, stdout out, prompt on stderr.
    pub fn run_stdio(self) -> Result<ClientClosure> {
        self.run(io::stdin().lock(), io::stdout().lock(), io::stderr())
    }
}
