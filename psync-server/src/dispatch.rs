//! Open/Kill dispatch: the only code that is allowed to mutate the session
//! table, which otherwise stays a dumb map.

use std::sync::Arc;

use log::warn;
use tokio::sync::{mpsc, Notify};

use psync_protocol::{Request, Response};

use crate::config::ServerConfig;
use crate::process;
use crate::pump;
use crate::session::{PeerKey, SessionEntry, SessionTable};

/// What the connection reader loop should do after a dispatched request.
pub enum DispatchOutcome {
    Continue,
    Close,
}

pub async fn dispatch(
    peer: &PeerKey,
    request: Request,
    config: &ServerConfig,
    sessions: &Arc<SessionTable>,
    responses: &mpsc::Sender<Response>,
    close: &Arc<Notify>,
) -> DispatchOutcome {
    match request {
        Request::Open { path, args, env } => {
            if let Some(prior) = sessions.take(peer).await {
                warn!("<{peer}> preempting existing session");
                prior.pump.abort();
                prior.child.kill().await;
            }

            match process::spawn(
                &path,
                &args,
                &env,
                config.inherit_base_env,
                config.target_user.as_deref(),
            ) {
                Ok((child, output)) => {
                    let child = Arc::new(child);
                    let pump = pump::spawn(
                        peer.clone(),
                        Arc::clone(&child),
                        output,
                        responses.clone(),
                        Arc::clone(sessions),
                        Arc::clone(close),
                    );
                    sessions
                        .put(peer.clone(), SessionEntry { child, pump })
                        .await;
                    let _ = responses.send(Response::Okay).await;
                }
                Err(x) => {
                    let _ = responses
                        .send(Response::Error {
                            msg: x.to_string(),
                        })
                        .await;
                }
            }

            DispatchOutcome::Continue
        }

        Request::Kill => {
            match sessions.take(peer).await {
                Some(entry) => {
                    entry.pump.abort();
                    entry.child.kill().await;
                    let code = entry.child.wait().await;
                    let _ = responses.send(Response::Exit { code }).await;
                }
                None => {
                    let _ = responses
                        .send(Response::Error {
                            msg: "no process was running".to_string(),
                        })
                        .await;
                }
            }

            DispatchOutcome::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::path::PathBuf;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_host: IpAddr::from([0, 0, 0, 0]),
            bind_port: 5000,
            allowlist: vec!["127.0.0.1".to_string()],
            cert_path: PathBuf::new(),
            key_path: PathBuf::new(),
            target_user: None,
            inherit_base_env: false,
        }
    }

    #[tokio::test]
    async fn open_spawn_failure_sends_error_and_creates_no_entry() {
        let sessions = Arc::new(SessionTable::new());
        let (tx, mut rx) = mpsc::channel(8);
        let config = test_config();
        let close = Arc::new(Notify::new());

        let outcome = dispatch(
            &"127.0.0.1".to_string(),
            Request::Open {
                path: "/does/not/exist".to_string(),
                args: Vec::new(),
                env: Default::default(),
            },
            &config,
            &sessions,
            &tx,
            &close,
        )
        .await;

        assert!(matches!(outcome, DispatchOutcome::Continue));
        assert!(matches!(rx.recv().await, Some(Response::Error { .. })));
        assert!(!sessions.contains("127.0.0.1").await);
    }

    #[tokio::test]
    async fn open_success_sends_okay_and_creates_entry() {
        let sessions = Arc::new(SessionTable::new());
        let (tx, mut rx) = mpsc::channel(8);
        let config = test_config();
        let close = Arc::new(Notify::new());

        let outcome = dispatch(
            &"127.0.0.1".to_string(),
            Request::Open {
                path: "/bin/true".to_string(),
                args: Vec::new(),
                env: Default::default(),
            },
            &config,
            &sessions,
            &tx,
            &close,
        )
        .await;

        assert!(matches!(outcome, DispatchOutcome::Continue));
        assert!(matches!(rx.recv().await, Some(Response::Okay)));
        assert!(sessions.contains("127.0.0.1").await);
    }

    #[tokio::test]
    async fn kill_with_no_session_sends_error_and_closes() {
        let sessions = Arc::new(SessionTable::new());
        let (tx, mut rx) = mpsc::channel(8);
        let config = test_config();
        let close = Arc::new(Notify::new());

        let outcome = dispatch(
            &"127.0.0.1".to_string(),
            Request::Kill,
            &config,
            &sessions,
            &tx,
            &close,
        )
        .await;

        assert!(matches!(outcome, DispatchOutcome::Close));
        assert!(matches!(rx.recv().await, Some(Response::Error { .. })));
    }

    #[tokio::test]
    async fn second_open_preempts_the_first() {
        let sessions = Arc::new(SessionTable::new());
        let (tx, mut rx) = mpsc::channel(8);
        let config = test_config();
        let close = Arc::new(Notify::new());
        let peer = "127.0.0.1".to_string();

        dispatch(
            &peer,
            Request::Open {
                path: "/bin/sleep".to_string(),
                args: vec!["60".to_string()],
                env: Default::default(),
            },
            &config,
            &sessions,
            &tx,
            &close,
        )
        .await;
        assert!(matches!(rx.recv().await, Some(Response::Okay)));

        dispatch(
            &peer,
            Request::Open {
                path: "/bin/true".to_string(),
                args: Vec::new(),
                env: Default::default(),
            },
            &config,
            &sessions,
            &tx,
            &close,
        )
        .await;
        assert!(matches!(rx.recv().await, Some(Response::Okay)));
        assert_eq!(sessions.len().await, 1);
    }
}
