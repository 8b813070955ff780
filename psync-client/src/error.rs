use derive_more::{Display, Error, From};

/// Top-level error type for the client binary.
#[derive(Debug, Display, Error, From)]
pub enum ClientError {
    Io(std::io::Error),
    Tls(rustls::Error),
    Codec(psync_protocol::CodecError),
    Websocket(tungstenite::Error),

    #[display(fmt = "target path {:?} does not exist or is not a file", _0)]
    MissingTarget(#[error(not(source))] std::path::PathBuf),

    #[display(fmt = "rsync exited with a non-zero status: {}", _0)]
    RsyncFailed(#[error(not(source))] i32),

    #[display(fmt = "connection closed before the server sent an exit frame")]
    ConnectionClosedEarly,
}

pub type ClientResult<T> = Result<T, ClientError>;
