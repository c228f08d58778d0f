//! In-memory test doubles for every port trait, mirroring the teacher's
//! `MockNetlink`/`MockFirewall`/`MockMark`/`MockStore` structs in
//! `app/run.rs`'s test module. Used by this crate's own tests and by
//! `netshield-selftest`.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use netshield_model::config::{NetshieldConfig, PersistedFlags};
use netshield_model::{AppInfo, BackendType, FirewallRule, NetworkType, Privileges, ScreenState};

use crate::{
    AssistChannel, AssistExecResult, NotificationSink, OsObserver, PackageSource,
    PersistentStore, PrivilegeProbe, RuleStore, ServiceHandle,
};

pub struct InMemoryRuleStore {
    tx: watch::Sender<Vec<FirewallRule>>,
    rx: watch::Receiver<Vec<FirewallRule>>,
}

impl InMemoryRuleStore {
    pub fn new(initial: Vec<FirewallRule>) -> Self {
        let (tx, rx) = watch::channel(initial);
        Self { tx, rx }
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    fn stream_rules(&self) -> watch::Receiver<Vec<FirewallRule>> {
        self.rx.clone()
    }

    async fn read_rules_once(&self) -> Result<Vec<FirewallRule>> {
        Ok(self.rx.borrow().clone())
    }

    async fn delete_all(&self) -> Result<()> {
        self.tx.send_replace(Vec::new());
        Ok(())
    }

    async fn upsert_many(&self, rules: Vec<FirewallRule>) -> Result<()> {
        self.tx.send_modify(|current| {
            for rule in rules {
                if let Some(existing) = current.iter_mut().find(|r| r.uid == rule.uid && r.package_name == rule.package_name) {
                    *existing = rule;
                } else {
                    current.push(rule);
                }
            }
        });
        Ok(())
    }
}

pub struct InMemoryPackageSource {
    pub apps: Mutex<Vec<AppInfo>>,
}

impl InMemoryPackageSource {
    pub fn new(apps: Vec<AppInfo>) -> Self {
        Self { apps: Mutex::new(apps) }
    }
}

#[async_trait]
impl PackageSource for InMemoryPackageSource {
    async fn list_network_apps(&self) -> Result<Vec<AppInfo>> {
        Ok(self
            .apps
            .lock()
            .expect("apps")
            .iter()
            .filter(|a| a.requests_network_permission)
            .cloned()
            .collect())
    }
}

pub struct InMemoryPrivilegeProbe {
    tx: watch::Sender<Privileges>,
    rx: watch::Receiver<Privileges>,
}

impl InMemoryPrivilegeProbe {
    pub fn new(initial: Privileges) -> Self {
        let (tx, rx) = watch::channel(initial);
        Self { tx, rx }
    }

    pub fn set(&self, privileges: Privileges) {
        self.tx.send_replace(privileges);
    }
}

#[async_trait]
impl PrivilegeProbe for InMemoryPrivilegeProbe {
    fn current(&self) -> Privileges {
        *self.rx.borrow()
    }

    fn watch(&self) -> watch::Receiver<Privileges> {
        self.rx.clone()
    }

    async fn recheck(&self) -> Privileges {
        self.current()
    }
}

#[derive(Default)]
pub struct InMemoryAssistChannel {
    pub exec_calls: Mutex<Vec<(String, Vec<String>)>>,
    pub scripted_exit_code: Mutex<i32>,
}

#[async_trait]
impl AssistChannel for InMemoryAssistChannel {
    async fn exec(&self, program: &str, args: &[&str]) -> Result<AssistExecResult> {
        self.exec_calls.lock().expect("exec_calls").push((
            program.to_string(),
            args.iter().map(|s| s.to_string()).collect(),
        ));
        Ok(AssistExecResult {
            exit_code: *self.scripted_exit_code.lock().expect("scripted_exit_code"),
            output: String::new(),
        })
    }

    async fn system_service_binder(&self, service_name: &str) -> Result<ServiceHandle> {
        Ok(ServiceHandle { service_name: service_name.to_string() })
    }
}

pub struct InMemoryOsObserver {
    network_tx: watch::Sender<NetworkType>,
    network_rx: watch::Receiver<NetworkType>,
    screen_tx: watch::Sender<ScreenState>,
    screen_rx: watch::Receiver<ScreenState>,
}

impl InMemoryOsObserver {
    pub fn new(network: NetworkType, screen: ScreenState) -> Self {
        let (network_tx, network_rx) = watch::channel(network);
        let (screen_tx, screen_rx) = watch::channel(screen);
        Self { network_tx, network_rx, screen_tx, screen_rx }
    }

    pub fn set_network(&self, network: NetworkType) {
        self.network_tx.send_replace(network);
    }

    pub fn set_screen(&self, screen: ScreenState) {
        self.screen_tx.send_replace(screen);
    }
}

#[async_trait]
impl OsObserver for InMemoryOsObserver {
    fn observe_network_type(&self) -> watch::Receiver<NetworkType> {
        self.network_rx.clone()
    }

    fn observe_screen(&self) -> watch::Receiver<ScreenState> {
        self.screen_rx.clone()
    }
}

#[derive(Default)]
pub struct InMemoryNotificationSink {
    pub permission_required: Mutex<u32>,
    pub backend_failed: Mutex<Vec<BackendType>>,
    pub vpn_conflict: Mutex<u32>,
    pub dismissed: Mutex<Vec<String>>,
}

impl NotificationSink for InMemoryNotificationSink {
    fn show_vpn_permission_required(&self) {
        *self.permission_required.lock().expect("permission_required") += 1;
    }

    fn show_backend_failed(&self, backend: BackendType) {
        self.backend_failed.lock().expect("backend_failed").push(backend);
    }

    fn show_vpn_conflict(&self) {
        *self.vpn_conflict.lock().expect("vpn_conflict") += 1;
    }

    fn dismiss(&self, id: &str) {
        self.dismissed.lock().expect("dismissed").push(id.to_string());
    }
}

#[derive(Default)]
pub struct InMemoryPersistentStore {
    config: Mutex<NetshieldConfig>,
    flags: Mutex<PersistedFlags>,
}

#[async_trait]
impl PersistentStore for InMemoryPersistentStore {
    async fn load_config(&self) -> Result<NetshieldConfig> {
        Ok(self.config.lock().expect("config").clone())
    }

    async fn save_config(&self, config: &NetshieldConfig) -> Result<()> {
        *self.config.lock().expect("config") = config.clone();
        Ok(())
    }

    async fn load_flags(&self) -> Result<PersistedFlags> {
        Ok(self.flags.lock().expect("flags").clone())
    }

    async fn save_flags(&self, flags: &PersistedFlags) -> Result<()> {
        *self.flags.lock().expect("flags") = flags.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(uid: i32) -> FirewallRule {
        FirewallRule {
            uid,
            package_name: format!("pkg.{uid}"),
            profile_id: 0,
            enabled: true,
            wifi_blocked: true,
            mobile_blocked: false,
            roaming_blocked: false,
            lan_blocked: false,
            block_when_background: false,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn rule_store_upsert_replaces_matching_uid_and_package() {
        let store = InMemoryRuleStore::new(vec![rule(1)]);
        let mut updated = rule(1);
        updated.wifi_blocked = false;
        updated.mobile_blocked = true;
        store.upsert_many(vec![updated.clone()]).await.unwrap();
        let rules = store.read_rules_once().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].mobile_blocked);
    }

    #[tokio::test]
    async fn rule_store_delete_all_clears_stream() {
        let store = InMemoryRuleStore::new(vec![rule(1), rule(2)]);
        store.delete_all().await.unwrap();
        assert!(store.read_rules_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn privilege_probe_reports_set_value() {
        let probe = InMemoryPrivilegeProbe::new(Privileges {
            has_root: false,
            has_assist: false,
            assist_is_root: false,
            api_level: 30,
        });
        probe.set(Privileges { has_root: true, has_assist: false, assist_is_root: false, api_level: 30 });
        assert!(probe.recheck().await.has_root);
    }

    #[tokio::test]
    async fn package_source_filters_non_network_apps() {
        let apps = vec![
            AppInfo { uid: 1, package_name: "a".into(), profile_id: 0, requests_network_permission: true, declares_vpn_service: false, is_system_critical: false },
            AppInfo { uid: 2, package_name: "b".into(), profile_id: 0, requests_network_permission: false, declares_vpn_service: false, is_system_critical: false },
        ];
        let source = InMemoryPackageSource::new(apps);
        let result = source.list_network_apps().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].uid, 1);
    }
}
