//! `PolicyChain` backend (spec §4.4): enables a platform-provided deny
//! chain globally, then flips per-package networking on or off through the
//! same chain via the assist channel. All-or-nothing — there is no
//! per-network-type distinction, so the manager must migrate any granular
//! rule to "block all" before this backend starts (spec §4.7).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use netshield_model::{AppliedPolicy, Backend, BackendType, DeriveInputs};
use netshield_ports::AssistChannel;

const CMD: &str = "cmd";

fn enable_chain_args() -> [&'static str; 4] {
    ["netpolicy", "set", "restrict-background", "true"]
}

fn disable_chain_args() -> [&'static str; 4] {
    ["netpolicy", "set", "restrict-background", "false"]
}

fn set_app_policy_args(package_name: &str, blocked: bool) -> Vec<String> {
    vec![
        "netpolicy".to_string(),
        "set".to_string(),
        "app-policy".to_string(),
        package_name.to_string(),
        if blocked { "reject".to_string() } else { "allow".to_string() },
    ]
}

pub struct PolicyChainBackend {
    assist: Arc<dyn AssistChannel>,
    cache: Mutex<AppliedPolicy>,
    active: AtomicBool,
}

impl PolicyChainBackend {
    pub fn new(assist: Arc<dyn AssistChannel>) -> Self {
        Self { assist, cache: Mutex::new(AppliedPolicy::default()), active: AtomicBool::new(false) }
    }

    pub async fn cached_policy(&self) -> AppliedPolicy {
        self.cache.lock().await.clone()
    }

    async fn set_app_policy(&self, package_name: &str, blocked: bool) -> anyhow::Result<()> {
        let args = set_app_policy_args(package_name, blocked);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = self.assist.exec(CMD, &arg_refs).await?;
        if !result.ok() {
            anyhow::bail!("netpolicy app-policy for {package_name} failed: {}", result.output);
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for PolicyChainBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::PolicyChain
    }

    async fn start(&self) -> anyhow::Result<()> {
        let result = self.assist.exec(CMD, &enable_chain_args()).await?;
        if !result.ok() {
            anyhow::bail!("enabling policy chain failed: {}", result.output);
        }
        self.active.store(true, Ordering::SeqCst);
        tracing::info!("policy-chain backend started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let result = self.assist.exec(CMD, &disable_chain_args()).await;
        if let Err(err) = result {
            tracing::warn!(%err, "best-effort policy chain disable failed");
        }
        self.active.store(false, Ordering::SeqCst);
        *self.cache.lock().await = AppliedPolicy::default();
        Ok(())
    }

    async fn apply_rules(&self, inputs: &DeriveInputs<'_>) -> anyhow::Result<()> {
        let desired = netshield_derive::derive_applied_policy(inputs);
        let mut cache = self.cache.lock().await;

        let mut changed: HashMap<&str, bool> = HashMap::new();
        for pkg in &desired.blocked {
            if !cache.blocked.contains(pkg) {
                changed.insert(pkg.as_str(), true);
            }
        }
        for pkg in &cache.blocked {
            if !desired.blocked.contains(pkg) {
                changed.insert(pkg.as_str(), false);
            }
        }

        for (pkg, blocked) in changed {
            self.set_app_policy(pkg, blocked).await?;
        }

        *cache = desired;
        Ok(())
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn check_availability(&self) -> bool {
        // Eligibility (hasAssist, apiLevel, platform support) is the
        // planner's job; once selected, this backend is available whenever
        // the assist channel answers at all.
        self.assist.exec(CMD, &["netpolicy", "status"]).await.map(|r| r.ok()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netshield_model::{AppInfo, DefaultPolicy, FirewallRule, NetworkType, ScreenState};
    use netshield_ports::mock::InMemoryAssistChannel;

    fn app(uid: i32, pkg: &str) -> AppInfo {
        AppInfo {
            uid,
            package_name: pkg.to_string(),
            profile_id: 0,
            requests_network_permission: true,
            declares_vpn_service: false,
            is_system_critical: false,
        }
    }

    fn rule(uid: i32, blocked: bool) -> FirewallRule {
        FirewallRule {
            uid,
            package_name: format!("pkg.{uid}"),
            profile_id: 0,
            enabled: true,
            wifi_blocked: blocked,
            mobile_blocked: blocked,
            roaming_blocked: blocked,
            lan_blocked: false,
            block_when_background: false,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn start_enables_chain_and_stop_disables_it() {
        let assist = Arc::new(InMemoryAssistChannel::default());
        let backend = PolicyChainBackend::new(assist.clone());
        backend.start().await.unwrap();
        assert!(backend.is_active().await);
        backend.stop().await.unwrap();
        assert!(!backend.is_active().await);

        let calls = assist.exec_calls.lock().unwrap();
        assert_eq!(calls[0].1, vec!["set", "restrict-background", "true"]);
        assert_eq!(calls[1].1, vec!["set", "restrict-background", "false"]);
    }

    #[tokio::test]
    async fn apply_only_issues_commands_for_changed_packages() {
        let assist = Arc::new(InMemoryAssistChannel::default());
        let backend = PolicyChainBackend::new(assist.clone());

        let apps = vec![app(10100, "a.app")];
        let rules = vec![rule(10100, true)];
        let inputs = DeriveInputs {
            rules: &rules,
            apps: &apps,
            network_type: NetworkType::Wifi,
            screen: ScreenState::ON,
            default_policy: DefaultPolicy::AllowAll,
            allow_critical: false,
            api_level: 30,
        };
        backend.apply_rules(&inputs).await.unwrap();
        assert!(backend.cached_policy().await.is_blocked("a.app"));
        assert_eq!(assist.exec_calls.lock().unwrap().len(), 1);

        // Re-applying identical inputs issues no further commands.
        backend.apply_rules(&inputs).await.unwrap();
        assert_eq!(assist.exec_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_clears_cache_so_next_start_reapplies_everything() {
        let assist = Arc::new(InMemoryAssistChannel::default());
        let backend = PolicyChainBackend::new(assist.clone());
        let apps = vec![app(10100, "a.app")];
        let rules = vec![rule(10100, true)];
        let inputs = DeriveInputs {
            rules: &rules,
            apps: &apps,
            network_type: NetworkType::Wifi,
            screen: ScreenState::ON,
            default_policy: DefaultPolicy::AllowAll,
            allow_critical: false,
            api_level: 30,
        };
        backend.apply_rules(&inputs).await.unwrap();
        backend.stop().await.unwrap();
        assert!(backend.cached_policy().await.blocked.is_empty());
    }
}
