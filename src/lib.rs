//! upcase-echo: a line-oriented TCP client and echo server.
//!
//! The client sends one line at a time and waits for the server's answer;
//! the server transforms each line (uppercase by default) and sends it back.
//!
//! Both sides share the same connection setup:
//! - `addr`: resolve a port to IPv4/TCP address candidates
//! - `establish`: try candidates in order until one binds or connects
//! - `session`: drive one connection until either side closes

pub mod addr;
pub mod client;
pub mod config;
pub mod error;
pub mod establish;
pub mod logging;
pub mod server;
pub mod session;
pub mod transform;

pub use config::Config;
pub use error::{Error, Result};
