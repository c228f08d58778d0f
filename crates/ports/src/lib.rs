//! External contracts the firewall core consumes and produces (spec §6),
//! following the teacher's `ops.rs` trait-for-mockability convention: one
//! trait per collaborator, with an `InMemory*` test double living next to
//! each trait for use in the crate's own unit tests and in
//! `netshield-selftest`.

pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use netshield_model::{AppInfo, BackendType, FirewallRule, NetworkType, Privileges, ScreenState};

/// Restartable stream of rule snapshots plus a one-shot read, and the two
/// bulk mutations the UI performs. `stream_rules` returns a `watch`
/// receiver rather than a one-shot `Stream` so every subscriber restarts
/// from the latest snapshot instead of missing updates that landed before
/// it subscribed.
#[async_trait]
pub trait RuleStore: Send + Sync {
    fn stream_rules(&self) -> watch::Receiver<Vec<FirewallRule>>;
    async fn read_rules_once(&self) -> Result<Vec<FirewallRule>>;
    async fn delete_all(&self) -> Result<()>;
    async fn upsert_many(&self, rules: Vec<FirewallRule>) -> Result<()>;
}

/// Enumerates installed applications. `requests_network_permission` and
/// `declares_vpn_service` are derived by the implementation from a
/// predefined set of permission strings — that derivation is this port's
/// responsibility, not the core's.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn list_network_apps(&self) -> Result<Vec<AppInfo>>;
}

/// Reports current availability of the two independent privilege channels.
/// `watch` gives the Manager's privilege-change handler a change-driven
/// subscription; `recheck` forces an immediate re-probe (used by the
/// permission watcher and by the VirtualDevice health monitor's
/// privilege-gain detection).
#[async_trait]
pub trait PrivilegeProbe: Send + Sync {
    fn current(&self) -> Privileges;
    fn watch(&self) -> watch::Receiver<Privileges>;
    async fn recheck(&self) -> Privileges;
}

/// A privileged execution channel distinct from root (ADB-level or
/// root-level capabilities depending on platform). `PolicyChain` and
/// `NetPolicy` are routed through this instead of a direct
/// `std::process::Command`, since the real execution channel is external
/// and privileged.
#[async_trait]
pub trait AssistChannel: Send + Sync {
    async fn exec(&self, program: &str, args: &[&str]) -> Result<AssistExecResult>;
    async fn system_service_binder(&self, service_name: &str) -> Result<ServiceHandle>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistExecResult {
    pub exit_code: i32,
    pub output: String,
}

impl AssistExecResult {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Opaque handle to a system service binder obtained through the assist
/// channel, e.g. the netpolicy manager binder `NetPolicy` calls
/// `setUidPolicy` through.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub service_name: String,
}

#[async_trait]
pub trait OsObserver: Send + Sync {
    fn observe_network_type(&self) -> watch::Receiver<NetworkType>;
    fn observe_screen(&self) -> watch::Receiver<ScreenState>;
}

pub trait NotificationSink: Send + Sync {
    fn show_vpn_permission_required(&self);
    fn show_backend_failed(&self, backend: BackendType);
    fn show_vpn_conflict(&self);
    fn dismiss(&self, id: &str);
}

/// Generalized form of the teacher's single-purpose `StateStoreOps`: a
/// get/set-by-key persisted store for the opaque KV layout in spec §6
/// (`firewall_enabled`, `firewall_mode`, `privileged_backend_type`, …).
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn load_config(&self) -> Result<netshield_model::config::NetshieldConfig>;
    async fn save_config(&self, config: &netshield_model::config::NetshieldConfig) -> Result<()>;
    async fn load_flags(&self) -> Result<netshield_model::config::PersistedFlags>;
    async fn save_flags(&self, flags: &netshield_model::config::PersistedFlags) -> Result<()>;
}
