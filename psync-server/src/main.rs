use log::error;

use psync_server::config::{Cli, ServerConfig};
use psync_server::server;

fn init_logger(level: psync_server::config::LogLevel) {
    env_logger::Builder::new()
        .filter_level(level.to_level_filter())
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_logger(cli.logging.resolve());

    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = ServerConfig::from_env().apply_cli(&cli);

    if let Err(x) = server::run(config).await {
        error!("fatal startup error: {x}");
        std::process::exit(1);
    }
}
