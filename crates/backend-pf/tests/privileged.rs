#![cfg(feature = "privileged-tests")]

use std::sync::Arc;

use netshield_backend_pf::PacketFilterBackend;
use netshield_model::{
    AppInfo, Backend, DefaultPolicy, DeriveInputs, FirewallRule, NetworkType, Privileges,
    ScreenState,
};
use netshield_ports::mock::InMemoryPrivilegeProbe;
use netshield_util::CommandRunner;

fn allow_firewall_tests() -> bool {
    std::env::var("NETSHIELD_PRIV_TESTS_ALLOW_FIREWALL").ok().as_deref() == Some("1")
}

#[tokio::test]
#[ignore]
async fn start_apply_and_stop_against_real_nft() {
    if !allow_firewall_tests() {
        eprintln!("skipping packet-filter test (set NETSHIELD_PRIV_TESTS_ALLOW_FIREWALL=1)");
        return;
    }

    let probe = Arc::new(InMemoryPrivilegeProbe::new(Privileges {
        has_root: true,
        has_assist: false,
        assist_is_root: false,
        api_level: 30,
    }));
    let backend = PacketFilterBackend::new(probe, CommandRunner::new(true, false));

    backend.start().await.expect("bootstrap table");
    assert!(backend.is_active().await);

    // Exercises the set-membership path (`nft add element ... blocked_uids
    // { uid }`), not just the empty-diff no-op: this is the path that fails
    // against a real kernel if the membership sets were never created.
    let apps = vec![AppInfo {
        uid: 10100,
        package_name: "a.app".into(),
        profile_id: 0,
        requests_network_permission: true,
        declares_vpn_service: false,
        is_system_critical: false,
    }];
    let rules = vec![FirewallRule {
        uid: 10100,
        package_name: "a.app".into(),
        profile_id: 0,
        enabled: true,
        wifi_blocked: true,
        mobile_blocked: false,
        roaming_blocked: false,
        lan_blocked: true,
        block_when_background: false,
        updated_at: 0,
    }];
    let inputs = DeriveInputs {
        rules: &rules,
        apps: &apps,
        network_type: NetworkType::Wifi,
        screen: ScreenState::ON,
        default_policy: DefaultPolicy::AllowAll,
        allow_critical: false,
        api_level: 30,
    };
    backend.apply_rules(&inputs).await.expect("apply ruleset blocking one uid");
    assert!(backend.cached_block_set().await.internet.contains(&10100));
    assert!(backend.cached_block_set().await.lan.contains(&10100));

    // Re-applying an empty ruleset removes the UID from both sets, so the
    // diff's remove path against the real sets is exercised too.
    let empty_rules = vec![];
    let empty_apps = vec![];
    let clear_inputs = DeriveInputs {
        rules: &empty_rules,
        apps: &empty_apps,
        network_type: NetworkType::Wifi,
        screen: ScreenState::ON,
        default_policy: DefaultPolicy::AllowAll,
        allow_critical: false,
        api_level: 30,
    };
    backend.apply_rules(&clear_inputs).await.expect("apply empty ruleset");
    assert!(backend.cached_block_set().await.is_empty());

    backend.stop().await.expect("tear down table");
    assert!(!backend.is_active().await);
}
