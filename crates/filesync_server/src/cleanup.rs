//! Background reaper for expired sync records.
//!
//! Runs periodically to drop records older than the registry's TTL.

use crate::dispatcher::Dispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background reaper task.
///
/// Returns immediately with a finished task if the registry has no TTL.
/// Abort the returned handle to stop reaping.
pub fn spawn_reaper(dispatcher: Arc<Dispatcher>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(ttl) = dispatcher.registry().ttl() else {
            tracing::info!("Sync record reaper disabled (no TTL)");
            return;
        };

        tracing::info!(
            "Sync record reaper started (ttl: {}s, interval: {}s)",
            ttl.as_secs(),
            every.as_secs()
        );

        let mut timer = interval(every);
        loop {
            timer.tick().await;

            let reaped = dispatcher.registry().reap_expired();
            if reaped > 0 {
                tracing::info!("Reaper: dropped {} expired sync records", reaped);
            } else {
                tracing::debug!("Reaper: no expired sync records");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::auth::{AuthenticationGate, CredentialStore};
    use crate::dispatcher::Call;
    use crate::protocol::Protocol;
    use crate::registry::SyncRecordRegistry;
    use crate::tracker::FileVersionTracker;
    use tempfile::TempDir;

    fn dispatcher(dir: &TempDir, registry: SyncRecordRegistry) -> Arc<Dispatcher> {
        let master = dir.path().join("master.txt");
        std::fs::write(&master, "x").unwrap();
        Arc::new(Dispatcher::new(
            AuthenticationGate::new(CredentialStore::from_pairs([("u", "p")])),
            FileVersionTracker::open(&master).unwrap(),
            registry,
            Arc::new(MemoryAuditLog::new()),
        ))
    }

    #[tokio::test]
    async fn reaper_drops_expired_records() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, SyncRecordRegistry::with_ttl(Duration::from_millis(1)));
        let call = Call::new("a", "u", "p");
        let id = dispatcher
            .get_file_content(&call, Protocol::RequestReply)
            .sync_id()
            .unwrap();
        assert!(dispatcher.registry().contains(&id));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let handle = spawn_reaper(Arc::clone(&dispatcher), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(!dispatcher.registry().contains(&id));
        let confirm = dispatcher.confirm_sync(&call, &id.to_string());
        assert_eq!(
            confirm.error,
            Some(format!("Unknown sync ID: {}", id))
        );
    }

    #[tokio::test]
    async fn reaper_disabled_without_ttl() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, SyncRecordRegistry::new());

        let handle = spawn_reaper(dispatcher, Duration::from_millis(1));

        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }
}
