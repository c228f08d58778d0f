use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A single per-application firewall rule as authored in the UI and
/// persisted by the external rule store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub uid: i32,
    pub package_name: String,
    pub profile_id: i32,
    pub enabled: bool,
    pub wifi_blocked: bool,
    pub mobile_blocked: bool,
    pub roaming_blocked: bool,
    pub lan_blocked: bool,
    pub block_when_background: bool,
    pub updated_at: i64,
}

impl FirewallRule {
    /// True once every network dimension is blocked — used by migration to
    /// detect rules that are already in "all-or-nothing" shape.
    pub fn blocks_all_networks(&self) -> bool {
        self.wifi_blocked && self.mobile_blocked && self.roaming_blocked
    }

    /// True if this rule blocks some but not all network types: the shape
    /// migration must rewrite before a non-granular backend starts.
    pub fn is_partially_blocked(&self) -> bool {
        let any = self.wifi_blocked || self.mobile_blocked || self.roaming_blocked;
        any && !self.blocks_all_networks()
    }

    pub fn blocked_on(&self, network: NetworkType) -> bool {
        match network {
            NetworkType::None => false,
            NetworkType::Wifi => self.wifi_blocked,
            NetworkType::Mobile => self.mobile_blocked,
            NetworkType::Roaming => self.roaming_blocked,
        }
    }
}

/// An installed application as enumerated by the external package source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub uid: i32,
    pub package_name: String,
    pub profile_id: i32,
    pub requests_network_permission: bool,
    pub declares_vpn_service: bool,
    pub is_system_critical: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    None,
    Wifi,
    Mobile,
    Roaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenState {
    pub on: bool,
}

impl ScreenState {
    pub const ON: ScreenState = ScreenState { on: true };
    pub const OFF: ScreenState = ScreenState { on: false };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Auto,
    VirtualDevice,
    PacketFilter,
    PolicyChain,
    NetPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    PacketFilter,
    PolicyChain,
    NetPolicy,
    VirtualDevice,
}

impl BackendType {
    /// Preference order used by the planner in `Mode::Auto`.
    pub const AUTO_ORDER: [BackendType; 4] = [
        BackendType::PacketFilter,
        BackendType::PolicyChain,
        BackendType::NetPolicy,
        BackendType::VirtualDevice,
    ];

    pub fn supports_granular_control(self) -> bool {
        matches!(self, BackendType::PacketFilter | BackendType::VirtualDevice)
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendType::PacketFilter => "packet_filter",
            BackendType::PolicyChain => "policy_chain",
            BackendType::NetPolicy => "net_policy",
            BackendType::VirtualDevice => "virtual_device",
        };
        f.write_str(s)
    }
}

/// Snapshot of privilege-channel availability as reported by the external
/// `PrivilegeProbe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privileges {
    pub has_root: bool,
    pub has_assist: bool,
    pub assist_is_root: bool,
    pub api_level: u32,
}

impl Privileges {
    /// Either privilege channel gives root-equivalent kernel access.
    pub fn has_root_equivalent(&self) -> bool {
        self.has_root || (self.has_assist && self.assist_is_root)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPlan {
    pub mode: Mode,
    pub backend_type: BackendType,
    pub requires_virtual_device_permission: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FirewallState {
    Stopped,
    Starting { backend_type: Option<BackendType> },
    Running { backend_type: BackendType },
    Error { message: String, last_backend: Option<BackendType> },
}

impl FirewallState {
    pub fn active_backend(&self) -> Option<BackendType> {
        match self {
            FirewallState::Running { backend_type } => Some(*backend_type),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    AllowAll,
    BlockAll,
}

/// The set of UIDs enforced as DROP by the `PacketFilter` backend, split by
/// dimension the way the chain itself distinguishes internet vs. LAN rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSet {
    pub internet: HashSet<i32>,
    pub lan: HashSet<i32>,
}

impl BlockSet {
    pub fn is_empty(&self) -> bool {
        self.internet.is_empty() && self.lan.is_empty()
    }
}

/// Per-UID block/allow decision cached by the non-granular backends
/// (`PolicyChain`, `NetPolicy`), keyed by package name since those backends
/// operate per declared package rather than per UID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedPolicy {
    pub blocked: HashSet<String>,
}

impl AppliedPolicy {
    pub fn is_blocked(&self, package_name: &str) -> bool {
        self.blocked.contains(package_name)
    }
}

/// Everything `netshield-derive` needs to compute the desired enforcement
/// state for one debounce pass, bundled so backends and the manager pass a
/// single value instead of five positional arguments.
#[derive(Debug, Clone, Copy)]
pub struct DeriveInputs<'a> {
    pub rules: &'a [FirewallRule],
    pub apps: &'a [AppInfo],
    pub network_type: NetworkType,
    pub screen: ScreenState,
    pub default_policy: DefaultPolicy,
    pub allow_critical: bool,
    pub api_level: u32,
}
