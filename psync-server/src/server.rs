//! Server shell: TLS context, accept loop, two-stage signal handling.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::admission::AdmissionFilter;
use crate::config::ServerConfig;
use crate::connection;
use crate::error::{ServerError, ServerResult};
use crate::session::SessionTable;
use crate::tls;

/// Binds, accepts, and serves connections until interrupted. Exit code is
/// 0 on a normal shutdown, 130 on interrupt, 1 on fatal startup error
/// (surfaced to `main` via the returned `Result`).
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let config = Arc::new(config);
    let acceptor = tls::build_acceptor(&config.cert_path, &config.key_path)?;

    let listener = TcpListener::bind((config.bind_host, config.bind_port))
        .await
        .map_err(ServerError::Io)?;
    info!(
        "psync-server listening on {}:{}",
        config.bind_host, config.bind_port
    );

    let sessions = Arc::new(SessionTable::new());
    let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    let accept_task = {
        let config = Arc::clone(&config);
        let sessions = Arc::clone(&sessions);
        let connections = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let (tcp, addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(x) => {
                        error!("accept failed: {x}");
                        continue;
                    }
                };

                let peer = addr.ip().to_string();
                info!("<{peer}> accepted TCP connection");

                let acceptor = acceptor.clone();
                let config = Arc::clone(&config);
                let sessions = Arc::clone(&sessions);

                let handle = tokio::spawn(serve_one(peer, tcp, acceptor, config, sessions));
                connections.lock().await.push(handle);
            }
        })
    };

    run_until_interrupted(accept_task, connections, sessions).await;
    Ok(())
}

async fn serve_one(
    peer: String,
    tcp: tokio::net::TcpStream,
    acceptor: tokio_rustls::TlsAcceptor,
    config: Arc<ServerConfig>,
    sessions: Arc<SessionTable>,
) {
    let tls_stream = match acceptor.accept(tcp).await {
        Ok(stream) => stream,
        Err(x) => {
            warn!("<{peer}> TLS handshake failed: {x}");
            return;
        }
    };

    let filter = AdmissionFilter::new(peer.clone(), config.allowlist.clone());
    match tokio_tungstenite::accept_hdr_async(tls_stream, filter).await {
        Ok(ws) => connection::handle(peer, ws, config, sessions).await,
        Err(x) => warn!("<{peer}> websocket upgrade rejected: {x}"),
    }
}

/// Drives the `{Running, GracefulStop, ForcedStop}` interrupt state machine.
/// A single `tokio::signal::ctrl_c()` await models `Running`; a second one
/// racing the shutdown grace period models the transition from
/// `GracefulStop` to `ForcedStop`.
async fn run_until_interrupted(
    accept_task: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
    sessions: Arc<SessionTable>,
) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install interrupt handler; exiting without a graceful shutdown");
        std::process::exit(130);
    }

    info!("interrupt received, shutting down gracefully");

    let graceful = async {
        accept_task.abort();

        for handle in connections.lock().await.drain(..) {
            handle.abort();
        }

        for entry in sessions.drain().await {
            entry.pump.abort();
            entry.child.kill().await;
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    tokio::select! {
        _ = graceful => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("second interrupt received, forcing immediate exit");
        }
    }

    std::process::exit(130);
}
