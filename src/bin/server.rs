//! upcase-server: echo every received line back in uppercase.
//!
//! Usage: `upcase-server [port]` (default port 8080).

use std::process::ExitCode;
use tracing::{error, info};
use upcase_echo::server::Server;
use upcase_echo::{logging, Config};

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.log_level);

    info!(port = %config.port, "Starting upcase-server");

    match Server::bind(&config) {
        Ok(server) => server.run(),
        Err(e) => {
            error!(error = %e, "Server failed to start");
            ExitCode::FAILURE
        }
    }
}
