//! Per-connection reader/writer task split: one task owns the receive half
//! and dispatches, the other owns the send half and drains an internal
//! channel fed by both the dispatcher and the output pump, so the
//! connection's send half is never touched concurrently.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::WebSocketStream;
use tungstenite::Message;

use psync_protocol::{Request, Response};

use crate::config::ServerConfig;
use crate::dispatch::{self, DispatchOutcome};
use crate::session::{PeerKey, SessionTable};

/// Drives one admitted connection until the peer closes it, a transport
/// error occurs, a `Kill` dispatch says to close, or the session's own pump
/// reaches a normal exit and asks for the connection to be torn down (spec
/// §4.5 step 4: the last frame of a session is followed by closing the
/// connection, not just by the session entry disappearing).
pub async fn handle<S>(
    peer: PeerKey,
    ws: WebSocketStream<S>,
    config: Arc<ServerConfig>,
    sessions: Arc<SessionTable>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (responses_tx, mut responses_rx) = mpsc::channel::<Response>(32);
    let close_notify = Arc::new(Notify::new());

    let writer_peer = peer.clone();
    let writer = tokio::spawn(async move {
        while let Some(response) = responses_rx.recv().await {
            let line = response.serialize();
            if sink.send(Message::Text(line)).await.is_err() {
                warn!("<{writer_peer}> failed to send response, closing");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let message = tokio::select! {
            biased;

            _ = close_notify.notified() => {
                trace!("<{peer}> session exited normally, closing connection");
                break;
            }

            message = stream.next() => message,
        };

        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(x)) => {
                warn!("<{peer}> transport error: {x}");
                break;
            }
            None => break,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(_) => {
                trace!("<{peer}> sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        let line = text.trim_end_matches('\n');
        match Request::parse(line) {
            Ok(request) => {
                let outcome = dispatch::dispatch(
                    &peer,
                    request,
                    &config,
                    &sessions,
                    &responses_tx,
                    &close_notify,
                )
                .await;
                if matches!(outcome, DispatchOutcome::Close) {
                    break;
                }
            }
            Err(x) => {
                let _ = responses_tx
                    .send(Response::Error {
                        msg: x.to_string(),
                    })
                    .await;
            }
        }
    }

    // Whether we got here by EOF, transport error, or an explicit Kill's
    // Close outcome: any session still registered for this peer must not
    // outlive the connection.
    if let Some(entry) = sessions.take(&peer).await {
        entry.pump.abort();
        entry.child.kill().await;
    }

    drop(responses_tx);
    let _ = writer.await;
}
