//! Pure per-application policy derivation and granular→simple rule
//! migration (spec §4.7). Grounded on the teacher's `config.rs` style:
//! small, independently testable functions over plain data, no I/O.

use std::collections::{HashMap, HashSet};

use netshield_model::{
    AppInfo, AppliedPolicy, BackendType, BlockSet, DefaultPolicy, DeriveInputs, FirewallRule,
    NetworkType, ScreenState,
};

/// Computes the desired `PacketFilter` enforcement state: which UIDs should
/// be DROPped on the internet dimension, and which on the LAN dimension.
/// Enforcement is inherently per-UID (owner-UID match), so packages sharing
/// a UID are grouped before any block/allow decision is made.
pub fn derive_block_set(inputs: &DeriveInputs<'_>) -> BlockSet {
    let apps_by_uid = group_apps_by_uid(inputs.apps);
    let rules_by_uid = group_rules_by_uid(inputs.rules);

    let mut internet = HashSet::new();
    let mut lan = HashSet::new();

    for (&uid, apps) in &apps_by_uid {
        if is_uid_exempt(apps, inputs.allow_critical) {
            continue;
        }
        let rules = rules_by_uid.get(&uid).map(Vec::as_slice).unwrap_or(&[]);
        if should_block_uid(rules, inputs.network_type, inputs.screen, inputs.default_policy) {
            internet.insert(uid);
        }
        if rules.iter().any(|r| r.enabled && r.lan_blocked) {
            lan.insert(uid);
        }
    }

    BlockSet { internet, lan }
}

/// Computes the desired all-or-nothing enforcement state for the
/// non-granular backends (`PolicyChain`, `NetPolicy`), expressed per
/// package name since those backends operate on declared packages rather
/// than owner-UID kernel matches.
pub fn derive_applied_policy(inputs: &DeriveInputs<'_>) -> AppliedPolicy {
    let apps_by_uid = group_apps_by_uid(inputs.apps);
    let rules_by_uid = group_rules_by_uid(inputs.rules);

    let mut blocked = HashSet::new();
    for (&uid, apps) in &apps_by_uid {
        if is_uid_exempt(apps, inputs.allow_critical) {
            continue;
        }
        let rules = rules_by_uid.get(&uid).map(Vec::as_slice).unwrap_or(&[]);
        if should_block_uid(rules, inputs.network_type, inputs.screen, inputs.default_policy) {
            for app in apps {
                blocked.insert(app.package_name.clone());
            }
        }
    }
    AppliedPolicy { blocked }
}

fn group_apps_by_uid(apps: &[AppInfo]) -> HashMap<i32, Vec<&AppInfo>> {
    let mut map: HashMap<i32, Vec<&AppInfo>> = HashMap::new();
    for app in apps.iter().filter(|a| a.requests_network_permission) {
        map.entry(app.uid).or_default().push(app);
    }
    map
}

fn group_rules_by_uid(rules: &[FirewallRule]) -> HashMap<i32, Vec<&FirewallRule>> {
    let mut map: HashMap<i32, Vec<&FirewallRule>> = HashMap::new();
    for rule in rules.iter().filter(|r| r.enabled) {
        map.entry(rule.uid).or_default().push(rule);
    }
    map
}

/// A UID is exempt from ever being enforced as DROP when `allow_critical`
/// is off and any package sharing that UID is system-critical or declares
/// a VPN service — protects against a non-critical package in a shared UID
/// dragging a critical one down with it.
fn is_uid_exempt(apps: &[&AppInfo], allow_critical: bool) -> bool {
    !allow_critical && apps.iter().any(|a| a.is_system_critical || a.declares_vpn_service)
}

/// Most-restrictive semantics: if any rule for the UID resolves to block
/// under the current network/screen state, the UID is blocked.
fn should_block_uid(
    rules: &[&FirewallRule],
    network: NetworkType,
    screen: ScreenState,
    default_policy: DefaultPolicy,
) -> bool {
    if rules.is_empty() {
        return default_policy == DefaultPolicy::BlockAll;
    }
    rules
        .iter()
        .any(|r| (!screen.on && r.block_when_background) || r.blocked_on(network))
}

/// Rewrites any rule that blocks some networks but not all to block all
/// three, conservatively, before starting a backend that cannot express
/// partial blocking. A no-op (and therefore idempotent) for rules that are
/// already all-or-nothing or fully unblocked.
pub fn migrate_rules_for_backend(rules: &[FirewallRule], target: BackendType) -> Vec<FirewallRule> {
    if target.supports_granular_control() {
        return rules.to_vec();
    }
    rules
        .iter()
        .cloned()
        .map(|mut rule| {
            if rule.is_partially_blocked() {
                rule.wifi_blocked = true;
                rule.mobile_blocked = true;
                rule.roaming_blocked = true;
            }
            rule
        })
        .collect()
}
