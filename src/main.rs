// SPDX-License-Identifier: MIT
// ashletd — the ashlet daemon. Listens on a Unix domain socket for
// completion requests from shell clients, gathers context, and returns
// AI-powered completions.

use clap::Parser;
use tracing::{error, info};

use ashlet::{resolve_socket_path, Server};

#[derive(Parser)]
#[command(name = "ashletd", about = "Ashlet shell-completion daemon", version)]
struct Args {
    /// Log every request and response
    #[arg(long)]
    verbose: bool,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "ASHLET_LOG")]
    log: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = if args.verbose {
        "debug".to_string()
    } else {
        args.log
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter.as_str())
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let socket_path = resolve_socket_path();
    info!(socket = %socket_path.display(), "starting");

    let server = match Server::new(&socket_path) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    info!("ready");
    let result = server.serve().await;
    server.close();

    if let Err(e) = result {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
