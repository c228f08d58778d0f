//! Functional scenarios straight out of the literal end-to-end examples
//! (S1, S2, S3, S6): each wires a fresh `NetshieldManager` against
//! in-memory ports and a `RecordingBackend`, drives it through the public
//! API, and checks the same outcome the scenario describes. S4/S5 depend on
//! the health monitor's real-time `FAST`/`SLOW` cadence rather than a single
//! synchronous call, so they are exercised instead by
//! `netshield-manager`'s own unit tests (`s4_privilege_loss_switches_active_backend_to_virtual_device`,
//! `s5_privilege_gain_switches_active_backend_back_via_check_backend_should_switch`),
//! which drive `handle_privilege_change`/`check_backend_should_switch`
//! directly against a `FakeBackend` over real wall-clock sleeps rather than
//! waiting on the monitor's cadence.

use std::sync::Arc;
use std::time::Duration;

use netshield_manager::{ManagerDeps, NetshieldManager, production_backend_factory};
use netshield_model::config::{NetshieldConfig, PersistedFlags};
use netshield_model::{
    AppInfo, BackendType, DefaultPolicy, FirewallError, FirewallRule, FirewallState, Mode,
    NetworkType, Privileges, ScreenState,
};
use netshield_planner::PlatformCapabilities;
use netshield_ports::mock::{
    InMemoryAssistChannel, InMemoryNotificationSink, InMemoryOsObserver, InMemoryPackageSource,
    InMemoryPersistentStore, InMemoryPrivilegeProbe, InMemoryRuleStore,
};

use crate::recording_backend::RecordingBackend;

pub struct Outcome {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

fn apps() -> Vec<AppInfo> {
    vec![
        AppInfo { uid: 10100, package_name: "a.app".into(), profile_id: 0, requests_network_permission: true, declares_vpn_service: false, is_system_critical: false },
        AppInfo { uid: 10101, package_name: "b.app".into(), profile_id: 0, requests_network_permission: true, declares_vpn_service: false, is_system_critical: false },
        AppInfo { uid: 10102, package_name: "c.vpn".into(), profile_id: 0, requests_network_permission: true, declares_vpn_service: true, is_system_critical: false },
        AppInfo { uid: 10103, package_name: "d.sys".into(), profile_id: 0, requests_network_permission: true, declares_vpn_service: false, is_system_critical: true },
    ]
}

fn rule(uid: i32, package_name: &str, wifi: bool, mobile: bool, roaming: bool) -> FirewallRule {
    FirewallRule {
        uid,
        package_name: package_name.into(),
        profile_id: 0,
        enabled: true,
        wifi_blocked: wifi,
        mobile_blocked: mobile,
        roaming_blocked: roaming,
        lan_blocked: false,
        block_when_background: false,
        updated_at: 0,
    }
}

/// Builds a manager wired entirely to in-memory ports plus a
/// `RecordingBackend` factory, and returns it alongside a handle to fetch
/// whichever `RecordingBackend` instance ends up active.
fn build_manager(
    rules: Vec<FirewallRule>,
    privileges: Privileges,
    network: NetworkType,
    default_policy: DefaultPolicy,
    mode: Mode,
) -> (Arc<NetshieldManager>, Arc<std::sync::Mutex<Vec<Arc<RecordingBackend>>>>) {
    let backends: Arc<std::sync::Mutex<Vec<Arc<RecordingBackend>>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let backends_for_factory = backends.clone();
    let backend_factory: Arc<netshield_manager::BackendFactory> = Arc::new(move |backend_type: BackendType| {
        let backend = Arc::new(RecordingBackend::new(backend_type));
        backends_for_factory.lock().expect("backends").push(backend.clone());
        backend as Arc<dyn netshield_model::Backend>
    });

    let deps = ManagerDeps {
        rule_store: Arc::new(InMemoryRuleStore::new(rules)),
        package_source: Arc::new(InMemoryPackageSource::new(apps())),
        privilege_probe: Arc::new(InMemoryPrivilegeProbe::new(privileges)),
        assist_channel: Arc::new(InMemoryAssistChannel::default()),
        os_observer: Arc::new(InMemoryOsObserver::new(network, ScreenState::ON)),
        notifications: Arc::new(InMemoryNotificationSink::default()),
        persistent_store: Arc::new(InMemoryPersistentStore::default()),
        platform: PlatformCapabilities { packet_filter_tool_present: true, policy_chain_supported: true },
        vdevice_config: netshield_backend_vdevice_config(),
        command_runner: netshield_util::CommandRunner::new(false, true),
        backend_factory,
    };

    let config = NetshieldConfig { firewall_mode: mode, default_policy, allow_critical: false };
    let manager = NetshieldManager::new(deps, config, PersistedFlags::default());
    (manager, backends)
}

fn netshield_backend_vdevice_config() -> netshield_backend_vdevice::VirtualDeviceConfig {
    netshield_backend_vdevice::VirtualDeviceConfig::default()
}

fn current_backend_of(backends: &Arc<std::sync::Mutex<Vec<Arc<RecordingBackend>>>>, bt: BackendType) -> Option<Arc<RecordingBackend>> {
    backends.lock().expect("backends").iter().rev().find(|b| b.backend_type() == bt).cloned()
}

pub async fn scenario_s1() -> Outcome {
    let privileges = Privileges { has_root: true, has_assist: false, assist_is_root: false, api_level: 34 };
    let rules = vec![rule(10100, "a.app", true, false, false)];
    let (manager, backends) = build_manager(rules, privileges, NetworkType::Wifi, DefaultPolicy::AllowAll, Mode::Auto);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let start_result = manager.start(None).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let active = *manager.active_backend().borrow();
    let pf = current_backend_of(&backends, BackendType::PacketFilter);
    let block_set = pf.as_ref().and_then(|b| b.last_block_set());

    let ok = start_result.is_ok()
        && active == Some(BackendType::PacketFilter)
        && block_set.as_ref().is_some_and(|bs| bs.internet == [10100].into_iter().collect());

    manager.stop().await;
    manager.shutdown();
    Outcome {
        name: "S1 granular block on wifi only",
        ok,
        detail: format!("active={active:?} block_set={block_set:?} start={start_result:?}"),
    }
}

pub async fn scenario_s2() -> Outcome {
    let privileges = Privileges { has_root: true, has_assist: false, assist_is_root: false, api_level: 34 };
    let (manager, backends) = build_manager(Vec::new(), privileges, NetworkType::Wifi, DefaultPolicy::BlockAll, Mode::Auto);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let start_result = manager.start(None).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let pf = current_backend_of(&backends, BackendType::PacketFilter);
    let block_set = pf.as_ref().and_then(|b| b.last_block_set());
    let expected: std::collections::HashSet<i32> = [10100, 10101].into_iter().collect();
    let ok = start_result.is_ok() && block_set.as_ref().is_some_and(|bs| bs.internet == expected);

    manager.stop().await;
    manager.shutdown();
    Outcome {
        name: "S2 block-all default with UID exemption",
        ok,
        detail: format!("block_set={block_set:?} start={start_result:?}"),
    }
}

pub async fn scenario_s3() -> Outcome {
    let privileges = Privileges { has_root: true, has_assist: true, assist_is_root: true, api_level: 34 };
    let rule_store = Arc::new(InMemoryRuleStore::new(vec![rule(10100, "a.app", true, false, false)]));

    let backends: Arc<std::sync::Mutex<Vec<Arc<RecordingBackend>>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let backends_for_factory = backends.clone();
    let backend_factory: Arc<netshield_manager::BackendFactory> = Arc::new(move |backend_type: BackendType| {
        let backend = Arc::new(RecordingBackend::new(backend_type));
        backends_for_factory.lock().expect("backends").push(backend.clone());
        backend as Arc<dyn netshield_model::Backend>
    });

    let deps = ManagerDeps {
        rule_store: rule_store.clone(),
        package_source: Arc::new(InMemoryPackageSource::new(apps())),
        privilege_probe: Arc::new(InMemoryPrivilegeProbe::new(privileges)),
        assist_channel: Arc::new(InMemoryAssistChannel::default()),
        os_observer: Arc::new(InMemoryOsObserver::new(NetworkType::Wifi, ScreenState::ON)),
        notifications: Arc::new(InMemoryNotificationSink::default()),
        persistent_store: Arc::new(InMemoryPersistentStore::default()),
        platform: PlatformCapabilities { packet_filter_tool_present: true, policy_chain_supported: true },
        vdevice_config: netshield_backend_vdevice_config(),
        command_runner: netshield_util::CommandRunner::new(false, true),
        backend_factory,
    };

    let config = NetshieldConfig { firewall_mode: Mode::Auto, default_policy: DefaultPolicy::AllowAll, allow_critical: false };
    let manager = NetshieldManager::new(deps, config, PersistedFlags::default());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let _ = manager.start(None).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    manager.set_mode(Mode::PolicyChain).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let migrated = rule_store.read_rules_once().await.unwrap_or_default();
    let migrated_rule = migrated.iter().find(|r| r.package_name == "a.app").cloned();
    let rewritten = migrated_rule.as_ref().is_some_and(|r| r.wifi_blocked && r.mobile_blocked && r.roaming_blocked);

    let pc = current_backend_of(&backends, BackendType::PolicyChain);
    let applied = pc.as_ref().and_then(|b| b.last_applied_policy());
    let blocked = applied.as_ref().is_some_and(|p| p.is_blocked("a.app"));

    let ok = rewritten && blocked;

    manager.stop().await;
    manager.shutdown();
    Outcome {
        name: "S3 granular to simple migration on mode switch",
        ok,
        detail: format!("migrated_rule={migrated_rule:?} applied={applied:?}"),
    }
}

pub async fn scenario_s6() -> Outcome {
    let privileges = Privileges { has_root: false, has_assist: false, assist_is_root: false, api_level: 30 };
    let (manager, _backends) = build_manager(Vec::new(), privileges, NetworkType::Wifi, DefaultPolicy::AllowAll, Mode::Auto);
    manager.set_other_vpn_active(true);

    let start_result = manager.start(None).await;
    let state = manager.firewall_state().borrow().clone();
    let is_down = *manager.is_firewall_down().borrow();

    let ok = matches!(start_result, Err(FirewallError::OtherVpnActive))
        && matches!(state, FirewallState::Error { .. })
        && !is_down;

    manager.shutdown();
    Outcome {
        name: "S6 foreign VPN present, no privilege",
        ok,
        detail: format!("start={start_result:?} state={state:?} is_down={is_down}"),
    }
}

pub async fn run_all() -> Vec<Outcome> {
    vec![scenario_s1().await, scenario_s2().await, scenario_s3().await, scenario_s6().await]
}
