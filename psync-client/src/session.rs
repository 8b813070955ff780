//! Drives one client session: connect, send a single `Open`, print `Log`
//! frames verbatim, forward local interrupts as `Kill`, and exit with the
//! code the server reports.

use std::io::Write;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::WebSocketStream;
use tungstenite::Message;

use psync_protocol::{Request, Response};

use crate::config::ServerSettings;
use crate::error::{ClientError, ClientResult};
use crate::tls;

type Stream = WebSocketStream<tokio_rustls::client::TlsStream<TcpStream>>;

/// Connects to the server, opens a session for `path`/`args`/`env`, and
/// drives it to completion. Returns the exit code the server reported.
pub async fn run(settings: &ServerSettings, path: String, args: Vec<String>, env: psync_protocol::Env) -> ClientResult<i32> {
    let mut ws = connect(settings).await?;

    let open = Request::Open { path, args, env };
    ws.send(Message::Text(open.serialize())).await?;

    let mut kill_sent = false;
    let mut opened = false;

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c(), if !kill_sent => {
                kill_sent = true;
                warn!("interrupt received, asking the server to kill the session");
                let _ = ws.send(Message::Text(Request::Kill.serialize())).await;
            }

            _ = tokio::signal::ctrl_c(), if kill_sent => {
                warn!("second interrupt received, forcing immediate exit");
                std::process::exit(130);
            }

            message = ws.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(x)) => return Err(ClientError::Websocket(x)),
                    None => return Err(ClientError::ConnectionClosedEarly),
                };

                let text = match message {
                    Message::Text(text) => text,
                    Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Message::Close(_) => return Err(ClientError::ConnectionClosedEarly),
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                };

                match Response::parse(text.trim_end_matches('\n'))? {
                    Response::Okay => {
                        opened = true;
                        info!("session open");
                    }
                    Response::Log { msg } => {
                        print!("{msg}");
                        let _ = std::io::stdout().flush();
                    }
                    Response::Exit { code } => return Ok(code),
                    Response::Error { msg } => {
                        eprintln!("psync-server error: {msg}");
                        if !opened {
                            // The one Open this client sent was rejected
                            // (spawn failure); nothing further will arrive.
                            return Ok(1);
                        }
                    }
                }
            }
        }
    }
}

async fn connect(settings: &ServerSettings) -> ClientResult<Stream> {
    let tcp = TcpStream::connect((settings.server_ip.as_str(), settings.server_port))
        .await
        .map_err(ClientError::Io)?;

    let client_config = tls::build_client_config(settings.cert_path.as_deref())?;
    let connector = TlsConnector::from(Arc::new(client_config));
    let server_name = ServerName::try_from(settings.server_ip.as_str())
        .map_err(|_| ClientError::Tls(rustls::Error::General("invalid server name".to_string())))?
        .to_owned();

    let tls_stream = connector.connect(server_name, tcp).await.map_err(ClientError::Io)?;

    let url = format!("wss://{}:{}/", settings.server_ip, settings.server_port);
    let (ws, _response) = tokio_tungstenite::client_async(url, tls_stream)
        .await
        .map_err(ClientError::Websocket)?;

    Ok(ws)
}
