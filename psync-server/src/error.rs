use derive_more::{Display, Error, From};

/// Top-level error type for the server binary.
#[derive(Debug, Display, Error, From)]
pub enum ServerError {
    Io(std::io::Error),
    Tls(rustls::Error),
    CertLoad(#[error(not(source))] String),
}

pub type ServerResult<T> = Result<T, ServerError>;
