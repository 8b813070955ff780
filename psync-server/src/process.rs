//! Child supervisor: spawns the requested executable, merges its stdout and
//! stderr into one ordered line stream, and exposes kill/wait to callers.
//!
//! stdout and stderr share a single OS pipe (one end `dup`'d for each), the
//! same way a shell's `2>&1` or Python's `stdout=PIPE, stderr=STDOUT` would —
//! two independently-scheduled pipes racing each other via `select!` can only
//! interleave lines on a best-effort basis, not preserve the child's actual
//! byte order. A dedicated task owns the `tokio::process::Child` and races
//! `child.wait()` against a kill channel via `tokio::select!` while draining
//! the shared pipe into a channel of lines.

use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::Stdio;

use log::{debug, trace, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{dup, pipe2};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};

use psync_protocol::Env;

/// A handle to a spawned child, independent of its output stream.
pub struct ChildHandle {
    kill_tx: mpsc::Sender<()>,
    exit: Mutex<ExitState>,
}

enum ExitState {
    Pending(oneshot::Receiver<i32>),
    Ready(i32),
}

impl ChildHandle {
    /// Requests termination. Idempotent; a second call is a no-op once the
    /// first kill has been observed by the supervisor task.
    pub async fn kill(&self) {
        let _ = self.kill_tx.send(()).await;
    }

    /// Waits for the child's exit code. Safe to call from more than one
    /// caller (e.g. the dispatcher's explicit `Kill` path and the output
    /// pump's EOF path both may call this) — the first caller drives the
    /// oneshot to completion, subsequent callers see the cached result.
    pub async fn wait(&self) -> i32 {
        let mut guard = self.exit.lock().await;
        match &*guard {
            ExitState::Ready(code) => *code,
            ExitState::Pending(_) => {
                let rx = match std::mem::replace(&mut *guard, ExitState::Ready(-1)) {
                    ExitState::Pending(rx) => rx,
                    ExitState::Ready(_) => unreachable!(),
                };
                let code = rx.await.unwrap_or(-9);
                *guard = ExitState::Ready(code);
                code
            }
        }
    }
}

/// Spawns `path` with `args`/`env`, returning a handle plus a channel of
/// merged stdout+stderr lines (each entry includes its trailing newline,
/// if the child emitted one).
///
/// `path` is resolved (`~` expanded, canonicalized) before argv[0] is set
/// to it; spawn failures (missing file, permission) surface as `io::Error`
/// and no task is started.
pub fn spawn(
    path: &str,
    args: &[String],
    env: &Env,
    inherit_base_env: bool,
    target_user: Option<&str>,
) -> io::Result<(ChildHandle, mpsc::Receiver<String>)> {
    let resolved = resolve_path(path)?;
    debug!("Resolved spawn target {path:?} to {resolved:?}");

    let mut command = Command::new(&resolved);
    command.args(args);

    if !inherit_base_env {
        command.env_clear();
    }
    command.envs(env.iter().map(|(k, v)| (k.clone(), v.clone())));

    // One real OS pipe shared by stdout and stderr (the write end `dup`'d),
    // so the parent sees both streams through a single fd in the order the
    // child actually wrote them, rather than merging two independently
    // scheduled pipes best-effort.
    let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC).map_err(nix_to_io)?;
    fcntl(&read_fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(nix_to_io)?;
    let write_fd_dup = dup(&write_fd).map_err(nix_to_io)?;

    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(write_fd))
        .stderr(Stdio::from(write_fd_dup));

    if let Some(user) = target_user {
        let (uid, gid) = lookup_user(user)?;
        unsafe {
            command.pre_exec(move || {
                nix::unistd::setgid(gid).map_err(nix_to_io)?;
                nix::unistd::setuid(uid).map_err(nix_to_io)?;
                Ok(())
            });
        }
    }

    let mut child = command.spawn()?;

    let read_file = std::fs::File::from(read_fd);
    let mut output_lines = BufReader::new(pipe::Receiver::from_file(read_file)?).lines();

    let (output_tx, output_rx) = mpsc::channel(32);
    let (kill_tx, mut kill_rx) = mpsc::channel(1);
    let (exit_tx, exit_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut output_done = false;
        let mut killed = false;

        let status = loop {
            tokio::select! {
                biased;

                _ = kill_rx.recv(), if !killed => {
                    killed = true;
                    trace!("Child supervisor received kill request");
                    let _ = child.start_kill();
                }

                line = output_lines.next_line(), if !output_done => {
                    match line {
                        Ok(Some(text)) => {
                            let _ = output_tx.send(format!("{text}\n")).await;
                        }
                        _ => output_done = true,
                    }
                }

                status = child.wait(), if output_done => {
                    break status;
                }
            }
        };

        drop(output_tx);

        let code = match status {
            Ok(status) => exit_code_of(status),
            Err(x) => {
                warn!("Failed to wait on child: {x}");
                -1
            }
        };
        let _ = exit_tx.send(code);
    });

    Ok((
        ChildHandle {
            kill_tx,
            exit: Mutex::new(ExitState::Pending(exit_rx)),
        },
        output_rx,
    ))
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        code
    } else if let Some(signal) = status.signal() {
        -signal
    } else {
        -1
    }
}

fn resolve_path(path: &str) -> io::Result<PathBuf> {
    let expanded: PathBuf = if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no server-side home directory"))?;
        if path == "~" {
            home
        } else {
            home.join(&path[2..])
        }
    } else {
        PathBuf::from(path)
    };

    std::fs::canonicalize(&expanded)
}

fn lookup_user(name: &str) -> io::Result<(nix::unistd::Uid, nix::unistd::Gid)> {
    let user = nix::unistd::User::from_name(name)
        .map_err(nix_to_io)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such user: {name}")))?;
    Ok((user.uid, user.gid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn spawn_true_exits_zero_with_no_output() {
        let (handle, mut rx) = spawn("/usr/bin/true", &[], &BTreeMap::new(), false, None)
            .or_else(|_| spawn("/bin/true", &[], &BTreeMap::new(), false, None))
            .expect("true(1) should exist on the test host");

        assert_eq!(rx.recv().await, None);
        assert_eq!(handle.wait().await, 0);
    }

    #[tokio::test]
    async fn spawn_merges_stdout_and_emits_lines() {
        let (handle, mut rx) = spawn(
            "/bin/sh",
            &["-c".to_string(), "echo hi".to_string()],
            &BTreeMap::new(),
            false,
            None,
        )
        .expect("sh should exist on the test host");

        let line = rx.recv().await.expect("expected one line of output");
        assert_eq!(line, "hi\n");
        assert_eq!(rx.recv().await, None);
        assert_eq!(handle.wait().await, 0);
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let result = spawn("/does/not/exist", &[], &BTreeMap::new(), false, None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn kill_terminates_long_running_child() {
        let (handle, mut rx) = spawn(
            "/bin/sleep",
            &["60".to_string()],
            &BTreeMap::new(),
            false,
            None,
        )
        .expect("sleep should exist on the test host");

        handle.kill().await;
        let code = handle.wait().await;
        assert!(code != 0, "killed child should not report a zero exit code");
        assert_eq!(rx.recv().await, None);
    }
}
