//! Collaborators and construction-time configuration the Manager needs but
//! does not own the lifetime of — the generalized form of the teacher's
//! `ops.rs` trait bundle, plus the backend-specific config each concrete
//! backend constructor requires.

use std::sync::Arc;

use netshield_backend_netpolicy::NetPolicyBackend;
use netshield_backend_pf::PacketFilterBackend;
use netshield_backend_policychain::PolicyChainBackend;
use netshield_backend_vdevice::{VirtualDeviceBackend, VirtualDeviceConfig};
use netshield_model::{Backend, BackendType};
use netshield_planner::PlatformCapabilities;
use netshield_ports::{AssistChannel, NotificationSink, OsObserver, PackageSource, PersistentStore, PrivilegeProbe, RuleStore};
use netshield_util::CommandRunner;

/// Constructs a fresh, unstarted backend instance of the requested type.
/// Injected as `ManagerDeps::backend_factory` so tests can substitute fakes
/// without touching the Manager's switch logic.
pub type BackendFactory = dyn Fn(BackendType) -> Arc<dyn Backend> + Send + Sync;

pub struct ManagerDeps {
    pub rule_store: Arc<dyn RuleStore>,
    pub package_source: Arc<dyn PackageSource>,
    pub privilege_probe: Arc<dyn PrivilegeProbe>,
    pub assist_channel: Arc<dyn AssistChannel>,
    pub os_observer: Arc<dyn OsObserver>,
    pub notifications: Arc<dyn NotificationSink>,
    pub persistent_store: Arc<dyn PersistentStore>,
    pub platform: PlatformCapabilities,
    pub vdevice_config: VirtualDeviceConfig,
    pub command_runner: CommandRunner,
    pub backend_factory: Arc<BackendFactory>,
}

impl ManagerDeps {
    /// Builds a fresh, unstarted backend instance of the requested type
    /// through the injected factory. The Manager never reuses a stopped
    /// backend instance — every switch builds a new one, matching spec §4.2
    /// step 4 ("new = fresh instance for the plan").
    pub fn build_backend(&self, backend_type: BackendType) -> Arc<dyn Backend> {
        (self.backend_factory)(backend_type)
    }
}

/// The real-adapter factory, wiring the four production backend
/// constructors against the privilege probe / assist channel / command
/// runner / tun config an embedder supplies. `netshieldd` is the only
/// caller; tests construct `ManagerDeps::backend_factory` directly.
pub fn production_backend_factory(
    privilege_probe: Arc<dyn PrivilegeProbe>,
    assist_channel: Arc<dyn AssistChannel>,
    command_runner: CommandRunner,
    vdevice_config: VirtualDeviceConfig,
) -> Arc<BackendFactory> {
    Arc::new(move |backend_type| match backend_type {
        BackendType::PacketFilter => Arc::new(PacketFilterBackend::new(
            privilege_probe.clone(),
            command_runner.clone(),
        )),
        BackendType::PolicyChain => Arc::new(PolicyChainBackend::new(assist_channel.clone())),
        BackendType::NetPolicy => Arc::new(NetPolicyBackend::new(assist_channel.clone())),
        BackendType::VirtualDevice => Arc::new(VirtualDeviceBackend::new(vdevice_config.clone())),
    })
}
