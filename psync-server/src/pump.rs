//! Output pump: reads a child's merged output channel and turns it into
//! `Log`/`Exit` response frames, tearing down the session entry on EOF.
//! Iterates lines until EOF, then waits on the child and emits its exit
//! code, then notifies the connection task to close — a normal exit ends
//! the connection just as the explicit `Kill` path does.

use std::sync::Arc;

use log::{trace, warn};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use psync_protocol::Response;

use crate::process::ChildHandle;
use crate::session::{PeerKey, SessionTable};

/// Spawns the pump task for one session. `responses` is the connection's
/// single outbound channel, shared with the dispatcher; `sessions` lets the
/// pump remove its own entry once the child has exited; `close` wakes the
/// connection's reader loop so it tears the connection down once the
/// session entry is gone.
pub fn spawn(
    peer: PeerKey,
    child: Arc<ChildHandle>,
    mut output: mpsc::Receiver<String>,
    responses: mpsc::Sender<Response>,
    sessions: Arc<SessionTable>,
    close: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = output.recv().await {
            trace!("<{peer}> pump forwarding {} bytes of output", line.len());
            if responses.send(Response::Log { msg: line }).await.is_err() {
                // Connection's writer half is gone; nothing left to do but
                // let the child run its course unobserved. Do not tear the
                // child down here — it may already be mid-teardown via an
                // explicit Kill dispatched concurrently.
                return;
            }
        }

        let code = child.wait().await;
        trace!("<{peer}> child exited with code {code}");

        if responses.send(Response::Exit { code }).await.is_err() {
            warn!("<{peer}> connection closed before exit frame could be sent");
        }

        sessions.remove(&peer).await;
        close.notify_one();
    })
}
