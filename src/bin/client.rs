//! upcase-client: send stdin line by line and print each response.
//!
//! Usage: `upcase-client [port]` (default port 8080).

use std::process::ExitCode;
use tracing::{error, info};
use upcase_echo::client::Client;
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

    info!(port = %config.port, "looking up port");

    match Client::connect(&config).and_then(Client::run_stdio) {
        Ok(closure) => {
            info!(?closure, "session ended");
            eprintln!("Done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Client failed");
            ExitCode::FAILURE
        }
    }
}
