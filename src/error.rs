//! Error taxonomy for the echo client and server.
//!
//! Resolution, establishment, listen and config errors are fatal for the
//! process. Accept, identify and session errors stay inside the connection
//! that produced them.

use crate::establish::EstablishAction;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The port could not be turned into any address candidate.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("invalid host {0:?}")]
    InvalidHost(String),

    #[error("unable to find IPv4 address over TCP for port {port}: {diagnostic}: {os_error}")]
    Lookup {
        port: String,
        /// Resolver status code (an `EAI_*` value).
        code: i32,
        /// Resolver diagnostic for `code`.
        diagnostic: String,
        /// System error captured right after the failed lookup.
        os_error: io::Error,
    },

    #[error("no IPv4 TCP address available for port {port}")]
    NoCandidates { port: String },
}

/// No candidate could be created and bound/connected.
#[derive(Debug, Error)]
#[error("failed to find address to {action} to socket ({attempts} candidates tried)")]
pub struct EstablishmentError {
    pub action: EstablishAction,
    pub attempts: usize,
    /// Failure of the last candidate tried, if any was tried.
    #[source]
    pub last_error: Option<io::Error>,
}

/// The bound socket could not be marked passive.
#[derive(Debug, Error)]
#[error("error listening to socket with backlog {backlog}: {source}")]
pub struct ListenError {
    pub backlog: i32,
    #[source]
    pub source: io::Error,
}

/// A single accept attempt failed.
#[derive(Debug, Error)]
#[error("failed to accept connection: {0}")]
pub struct AcceptError(#[from] pub io::Error);

/// Reverse lookup of a peer address failed.
#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("reverse lookup failed: {diagnostic} (code {code})")]
    Lookup { code: i32, diagnostic: String },

    #[error("reverse lookup is only supported for IPv4 peers")]
    Unsupported,
}

/// I/O failure that ends the current session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

/// Errors that terminate a whole process.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Establishment(#[from] EstablishmentError),

    #[error(transparent)]
    Listen(#[from] ListenError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
