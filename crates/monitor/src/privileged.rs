//! Health monitor shape for the three privileged backends (spec §4.8):
//! each tick calls `check_availability` and `is_active`; on failure it
//! reports the backend type and exits — a fresh monitor attaches when the
//! Manager starts the next backend.

use std::sync::Arc;

use netshield_model::{Backend, BackendType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cadence::{CadenceConfig, CadenceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A tick found the backend no longer available or no longer active;
    /// the monitor loop exits immediately after sending this.
    BackendUnhealthy(BackendType),
    /// The `VirtualDevice` monitor found the Planner now prefers a
    /// different, more capable backend.
    PrivilegeGained(BackendType),
}

pub fn spawn_privileged_monitor(
    backend: Arc<dyn Backend>,
    cadence: CadenceConfig,
    events: mpsc::Sender<MonitorEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = CadenceState::new(cadence);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(state.interval()) => {}
            }

            let healthy = backend.check_availability().await && backend.is_active().await;
            if healthy {
                state.record_success();
                continue;
            }

            tracing::warn!(backend = %backend.backend_type(), "privileged backend health check failed");
            let _ = events.send(MonitorEvent::BackendUnhealthy(backend.backend_type())).await;
            return;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use netshield_model::DeriveInputs;

    struct FlakyBackend {
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        fn backend_type(&self) -> BackendType {
            BackendType::PacketFilter
        }
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn apply_rules(&self, _inputs: &DeriveInputs<'_>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn is_active(&self) -> bool {
            true
        }
        async fn check_availability(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reports_backend_and_exits_loop() {
        let healthy = Arc::new(AtomicBool::new(false));
        let backend: Arc<dyn Backend> = Arc::new(FlakyBackend { healthy: healthy.clone() });
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let cadence = CadenceConfig { fast: Duration::from_millis(10), slow: Duration::from_secs(300), stable_threshold: 5 };

        let handle = spawn_privileged_monitor(backend, cadence, tx, cancel);
        tokio::time::advance(Duration::from_millis(20)).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event, MonitorEvent::BackendUnhealthy(BackendType::PacketFilter));
        handle.await.unwrap();
    }
}
