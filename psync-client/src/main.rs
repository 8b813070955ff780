use log::error;

use psync_client::config::{Cli, ServerSettings};
use psync_client::error::{ClientError, ClientResult};
use psync_client::{session, sync};

fn init_logger(level: psync_client::config::LogLevel) {
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

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(x) => {
            error!("{x}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> ClientResult<i32> {
    if !cli.path.is_file() {
        return Err(ClientError::MissingTarget(cli.path));
    }

    let settings = ServerSettings::from_env();
    let cwd = std::env::current_dir().map_err(ClientError::Io)?;
    let dest = sync::dest_dir(&settings, &cwd);

    sync::rsync(&settings, &cli.path, &cli.extra, &dest)?;

    let basename = cli
        .path
        .file_name()
        .expect("is_file() guarantees a file name")
        .to_string_lossy();
    let remote_path = format!("{dest}/{basename}");

    let args = shell_words::split(&cli.args).map_err(|_| {
        ClientError::Codec(psync_protocol::CodecError::MalformedQuoting(cli.args.clone()))
    })?;
    let env = psync_protocol::parse_env(&cli.env)?;

    session::run(&settings, remote_path, args, env).await
}
