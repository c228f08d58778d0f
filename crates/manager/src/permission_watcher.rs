//! Bounded exponential-backoff loop for the `VirtualDevice` permission gate
//! (spec §4.2 failure semantics): 2s → 16s, capped at ~30 attempts. Exits
//! early as soon as permission is observed granted, handing control back
//! to the caller to retry `start()`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MAX_ATTEMPTS: u32 = 30;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(16);

/// Polls `permission_granted` with exponential backoff; calls `on_granted`
/// (expected to retry `start()`) the moment it observes `true`, then exits.
/// Gives up silently after `MAX_ATTEMPTS` — the caller remains in
/// `PermissionRequired`/`isFirewallDown` until the user triggers `start()`
/// again through some other path.
pub fn spawn_permission_watcher<F>(
    permission_granted: Arc<AtomicBool>,
    cancel: CancellationToken,
    on_granted: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 0..MAX_ATTEMPTS {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            if permission_granted.load(Ordering::SeqCst) {
                tracing::info!(attempt, "virtual-device permission observed granted");
                on_granted();
                return;
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        tracing::warn!("virtual-device permission watcher exhausted retries");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn stops_polling_once_permission_is_granted() {
        let granted = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();

        let handle = spawn_permission_watcher(granted.clone(), cancel.clone(), move || {
            *calls_clone.lock().unwrap() += 1;
        });

        tokio::time::advance(Duration::from_secs(3)).await;
        granted.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(5)).await;

        handle.await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_without_calling_back() {
        let granted = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();

        let handle = spawn_permission_watcher(granted, cancel.clone(), move || {
            *calls_clone.lock().unwrap() += 1;
        });
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
