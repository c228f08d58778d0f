//! Pure backend selector (spec §4.1). `plan` performs no I/O beyond the
//! privilege/platform snapshot handed to it — it never starts anything —
//! mirroring the teacher's `choose_firewall_backend`/`choose_mark_backend`
//! pure-selection functions in `run.rs`.

use netshield_model::{BackendType, FirewallError, Mode, Privileges, StartPlan};

/// Platform-level facts the planner needs but cannot itself probe (tool
/// presence, shell-command support) — collected once per planning pass by
/// the caller, kept separate from `Privileges` since they come from a
/// different external source (`PrivilegeProbe` vs. a one-shot platform
/// check).
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformCapabilities {
    pub packet_filter_tool_present: bool,
    pub policy_chain_supported: bool,
}

/// Minimum platform API level the kernel policy-chain API requires.
pub const API_LEVEL_POLICY_CHAIN: u32 = 28;

pub fn plan(
    mode: Mode,
    privileges: Privileges,
    platform: PlatformCapabilities,
    other_vpn_active: bool,
) -> Result<StartPlan, FirewallError> {
    let backend_type = match mode {
        Mode::Auto => BackendType::AUTO_ORDER
            .into_iter()
            .find(|&bt| is_eligible(bt, privileges, platform, other_vpn_active))
            .ok_or_else(|| FirewallError::PlanFailure {
                cause: "no backend is eligible under current privileges".to_string(),
            })?,
        Mode::VirtualDevice => require(BackendType::VirtualDevice, privileges, platform, other_vpn_active)?,
        Mode::PacketFilter => require(BackendType::PacketFilter, privileges, platform, other_vpn_active)?,
        Mode::PolicyChain => require(BackendType::PolicyChain, privileges, platform, other_vpn_active)?,
        Mode::NetPolicy => require(BackendType::NetPolicy, privileges, platform, other_vpn_active)?,
    };

    Ok(StartPlan {
        mode,
        backend_type,
        requires_virtual_device_permission: backend_type == BackendType::VirtualDevice,
    })
}

fn require(
    backend: BackendType,
    privileges: Privileges,
    platform: PlatformCapabilities,
    other_vpn_active: bool,
) -> Result<BackendType, FirewallError> {
    if is_eligible(backend, privileges, platform, other_vpn_active) {
        Ok(backend)
    } else {
        Err(FirewallError::Unavailable {
            backend,
            reason: ineligibility_reason(backend, privileges, platform, other_vpn_active),
        })
    }
}

fn is_eligible(
    backend: BackendType,
    privileges: Privileges,
    platform: PlatformCapabilities,
    other_vpn_active: bool,
) -> bool {
    match backend {
        BackendType::PacketFilter => {
            privileges.has_root_equivalent() && platform.packet_filter_tool_present
        }
        BackendType::PolicyChain => {
            privileges.has_assist
                && privileges.api_level >= API_LEVEL_POLICY_CHAIN
                && platform.policy_chain_supported
        }
        BackendType::NetPolicy => privileges.has_assist,
        // A foreign VPN already owns the single virtual-device slot.
        BackendType::VirtualDevice => !other_vpn_active,
    }
}

fn ineligibility_reason(
    backend: BackendType,
    privileges: Privileges,
    platform: PlatformCapabilities,
    other_vpn_active: bool,
) -> String {
    match backend {
        BackendType::PacketFilter if !privileges.has_root_equivalent() => {
            "no root or root-equivalent assist channel".to_string()
        }
        BackendType::PacketFilter => "packet-filter tool not present".to_string(),
        BackendType::PolicyChain if !privileges.has_assist => "no assist channel".to_string(),
        BackendType::PolicyChain if privileges.api_level < API_LEVEL_POLICY_CHAIN => {
            format!("api level {} below required {}", privileges.api_level, API_LEVEL_POLICY_CHAIN)
        }
        BackendType::PolicyChain => "platform policy-chain command unsupported".to_string(),
        BackendType::NetPolicy => "no assist channel".to_string(),
        BackendType::VirtualDevice if other_vpn_active => {
            "another virtual-device VPN already active".to_string()
        }
        BackendType::VirtualDevice => "unavailable".to_string(),
    }
}
