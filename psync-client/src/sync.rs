//! File-sync step: shells out to `rsync` to copy the target executable (and
//! any extra files) to a destination directory on the server, named by a
//! stable hash of the client's current working directory. Runs rsync to
//! completion synchronously and aborts the whole client if it reports a
//! non-zero exit status.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::process::Command;

use log::info;

use crate::config::ServerSettings;
use crate::error::{ClientError, ClientResult};

/// Computes the server-side destination directory for this client: the
/// configured base destination, joined with a 16-hex-digit hash of the
/// client's working directory, so repeated runs from the same directory
/// land in the same place while different directories don't collide.
///
/// No hashing crate is pulled in for this: the corpus doesn't reach for one
/// for non-cryptographic, process-local hashing, so `DefaultHasher` (already
/// in `std`, already used anywhere a `HashMap` is) is the idiomatic choice.
pub fn dest_dir(settings: &ServerSettings, cwd: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    cwd.hash(&mut hasher);
    format!("{}/{:016x}", settings.server_dest.trim_end_matches('/'), hasher.finish())
}

/// Runs `rsync` synchronously to copy `target` and `extra` into `dest` on
/// the server, over SSH using the configured port and extra SSH arguments.
pub fn rsync(settings: &ServerSettings, target: &Path, extra: &[String], dest: &str) -> ClientResult<()> {
    let ssh_cmd = format!("ssh {} -p {}", settings.ssh_args, settings.ssh_port);
    let url = format!("{}:{}", settings.server_ip, dest);

    let mut args: Vec<String> = vec![
        "-avzr".to_string(),
        "--progress".to_string(),
        "--mkpath".to_string(),
        "-e".to_string(),
        ssh_cmd,
        target.display().to_string(),
    ];
    args.extend(extra.iter().cloned());
    args.push(url);

    info!("Running rsync {}", args.join(" "));
    let status = Command::new("rsync").args(&args).status().map_err(ClientError::Io)?;

    if !status.success() {
        return Err(ClientError::RsyncFailed(status.code().unwrap_or(-1)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ServerSettings {
        ServerSettings {
            server_ip: "127.0.0.1".to_string(),
            server_port: 5000,
            ssh_port: 5022,
            server_dest: "/home/psync/".to_string(),
            ssh_args: "-l psync".to_string(),
            cert_path: None,
        }
    }

    #[test]
    fn dest_dir_is_stable_for_the_same_cwd() {
        let settings = settings();
        let cwd = Path::new("/home/alice/project");
        assert_eq!(dest_dir(&settings, cwd), dest_dir(&settings, cwd));
    }

    #[test]
    fn dest_dir_differs_across_cwds() {
        let settings = settings();
        let a = dest_dir(&settings, Path::new("/home/alice/project"));
        let b = dest_dir(&settings, Path::new("/home/bob/project"));
        assert_ne!(a, b);
    }

    #[test]
    fn dest_dir_strips_trailing_slash_from_base() {
        let settings = settings();
        let dest = dest_dir(&settings, Path::new("/tmp"));
        assert!(dest.starts_with("/home/psync/"));
        assert!(!dest.contains("//"));
    }
}
