//! Health monitor shape for the `VirtualDevice` backend (spec §4.8):
//! detects privilege *gain* by re-probing `PrivilegeProbe` and rerunning
//! the Planner in `Auto` mode each tick; if it now prefers a non-virtual
//! backend, reports that backend type so the Manager can initiate a
//! switch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use netshield_model::BackendType;
use netshield_planner::{self, PlatformCapabilities};
use netshield_ports::PrivilegeProbe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cadence::{CadenceConfig, CadenceState};
use crate::privileged::MonitorEvent;

pub fn spawn_virtual_device_monitor(
    privilege_probe: Arc<dyn PrivilegeProbe>,
    platform: PlatformCapabilities,
    other_vpn_active: Arc<AtomicBool>,
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

            let privileges = privilege_probe.recheck().await;
            let plan = netshield_planner::plan(
                netshield_model::Mode::Auto,
                privileges,
                platform,
                other_vpn_active.load(Ordering::SeqCst),
            );

            match plan {
                Ok(plan) if plan.backend_type != BackendType::VirtualDevice => {
                    tracing::info!(backend = %plan.backend_type, "privilege gain detected, requesting switch");
                    let _ = events.send(MonitorEvent::PrivilegeGained(plan.backend_type)).await;
                    return;
                }
                _ => {
                    state.record_success();
                }
            }
        }
    })
}
