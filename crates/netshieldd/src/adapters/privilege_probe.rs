//! `PrivilegeProbe` reference adapter: reads root/capability state straight
//! out of `/proc/self/status` via `netshield-util`'s existing
//! `is_root`/`has_cap_net_admin` helpers, polled on a timer and broadcast
//! through a `watch` channel the Manager's privilege-change supervisor
//! subscribes to. The `assist` channel has no portable probe without a real
//! vendor client, so this adapter reports it unavailable — an embedder with
//! a real assist client swaps this adapter out entirely.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use netshield_model::Privileges;
use netshield_ports::PrivilegeProbe;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Reference API level; a real platform probe would read this from the OS.
const DEFAULT_API_LEVEL: u32 = 34;

pub struct ProcPrivilegeProbe {
    tx: watch::Sender<Privileges>,
    rx: watch::Receiver<Privileges>,
    assist_available: Arc<AtomicBool>,
}

impl ProcPrivilegeProbe {
    pub fn start(cancel: CancellationToken) -> Self {
        let initial = probe_now(false);
        let (tx, rx) = watch::channel(initial);
        let assist_available = Arc::new(AtomicBool::new(false));
        let probe = Self { tx, rx, assist_available };
        probe.spawn_poll_task(cancel);
        probe
    }

    /// Lets an embedder with a real assist client flip availability; this
    /// adapter otherwise never sets it itself.
    pub fn assist_available_handle(&self) -> Arc<AtomicBool> {
        self.assist_available.clone()
    }

    fn spawn_poll_task(&self, cancel: CancellationToken) {
        let tx = self.tx.clone();
        let assist_available = self.assist_available.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
                let has_assist = assist_available.load(Ordering::SeqCst);
                tx.send_if_modified(|current| {
                    let fresh = probe_now(has_assist);
                    if *current == fresh {
                        false
                    } else {
                        *current = fresh;
                        true
                    }
                });
            }
        });
    }
}

fn probe_now(has_assist: bool) -> Privileges {
    Privileges {
        has_root: netshield_util::is_root(),
        has_assist,
        assist_is_root: false,
        api_level: DEFAULT_API_LEVEL,
    }
}

#[async_trait]
impl PrivilegeProbe for ProcPrivilegeProbe {
    fn current(&self) -> Privileges {
        *self.rx.borrow()
    }

    fn watch(&self) -> watch::Receiver<Privileges> {
        self.rx.clone()
    }

    async fn recheck(&self) -> Privileges {
        let fresh = probe_now(self.assist_available.load(Ordering::SeqCst));
        self.tx.send_if_modified(|current| {
            if *current == fresh {
                false
            } else {
                *current = fresh;
                true
            }
        });
        fresh
    }
}
