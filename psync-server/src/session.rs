//! Per-peer session table. Kept as a dumb map guarded by a single mutex —
//! preemption (killing a prior child before overwriting its entry) is the
//! caller's responsibility, per the dispatcher in `dispatch.rs`. The table
//! needs synchronization because this server runs on Tokio's default
//! multithreaded runtime rather than a single-threaded executor, even though
//! only one writer touches any given peer's entry at a time in practice.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::process::ChildHandle;

/// The remote IP address observed at connection accept time.
pub type PeerKey = String;

/// A live session: a supervised child and the task pumping its output.
pub struct SessionEntry {
    pub child: Arc<ChildHandle>,
    pub pump: JoinHandle<()>,
}

/// Process-wide map of peer key to live session, single-writer per peer by
/// construction (the dispatcher always kills+cancels before overwriting).
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<PeerKey, SessionEntry>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the prior entry for `peer`, if any, so the
    /// caller can kill its child and cancel its pump before it is dropped.
    pub async fn take(&self, peer: &str) -> Option<SessionEntry> {
        self.sessions.lock().await.remove(peer)
    }

    pub async fn put(&self, peer: PeerKey, entry: SessionEntry) {
        self.sessions.lock().await.insert(peer, entry);
    }

    pub async fn remove(&self, peer: &str) -> Option<SessionEntry> {
        self.sessions.lock().await.remove(peer)
    }

    pub async fn contains(&self, peer: &str) -> bool {
        self.sessions.lock().await.contains_key(peer)
    }

    /// Removes every entry, for use during shutdown: the caller is
    /// responsible for aborting each pump and killing each child.
    pub async fn drain(&self) -> Vec<SessionEntry> {
        self.sessions.lock().await.drain().map(|(_, v)| v).collect()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process;
    use std::collections::BTreeMap;

    async fn dummy_entry() -> SessionEntry {
        let (child, _rx) =
            process::spawn("/bin/sleep", &["1".to_string()], &BTreeMap::new(), false, None)
                .expect("sleep should exist on the test host");
        let pump = tokio::spawn(async {});
        SessionEntry {
            child: Arc::new(child),
            pump,
        }
    }

    #[tokio::test]
    async fn put_then_take_round_trips() {
        let table = SessionTable::new();
        assert!(!table.contains("1.2.3.4").await);

        table.put("1.2.3.4".to_string(), dummy_entry().await).await;
        assert!(table.contains("1.2.3.4").await);
        assert_eq!(table.len().await, 1);

        let entry = table.take("1.2.3.4").await;
        assert!(entry.is_some());
        assert!(!table.contains("1.2.3.4").await);
    }

    #[tokio::test]
    async fn put_overwrites_existing_entry_for_same_peer() {
        let table = SessionTable::new();
        table.put("1.2.3.4".to_string(), dummy_entry().await).await;
        table.put("1.2.3.4".to_string(), dummy_entry().await).await;
        assert_eq!(table.len().await, 1);
    }
}
