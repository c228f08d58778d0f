//! `NetPolicy` backend (spec §4.5): obtains the system netpolicy binder
//! through the assist channel and calls a hidden `setUidPolicy(uid,
//! policyMask)` per design notes' "encapsulate behind a small adapter
//! exposing only `setUidPolicy`". Like `PolicyChain`, there is no
//! per-network-type distinction — `derive_block_set`'s internet dimension
//! is reused as the single per-UID block/allow decision.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use netshield_model::{Backend, BackendType, DeriveInputs};
use netshield_ports::{AssistChannel, ServiceHandle};

const SERVICE_NAME: &str = "netpolicy";
const TRANSACTION_SET_UID_POLICY: &str = "2";

/// Policy mask bits this adapter probes support for, most to least
/// restrictive. `REJECT_ALL` blocks every network; the fallback restricts
/// coverage to metered networks only (spec §4.5, Open Question 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMask {
    RejectAll,
    RejectMeteredBackground,
}

impl PolicyMask {
    fn code(self) -> &'static str {
        match self {
            PolicyMask::RejectAll => "7",
            PolicyMask::RejectMeteredBackground => "1",
        }
    }
}

const POLICY_NONE: &str = "0";

pub struct NetPolicyBackend {
    assist: Arc<dyn AssistChannel>,
    handle: Mutex<Option<ServiceHandle>>,
    mask: Mutex<Option<PolicyMask>>,
    cache: Mutex<HashSet<i32>>,
    active: AtomicBool,
}

impl NetPolicyBackend {
    pub fn new(assist: Arc<dyn AssistChannel>) -> Self {
        Self {
            assist,
            handle: Mutex::new(None),
            mask: Mutex::new(None),
            cache: Mutex::new(HashSet::new()),
            active: AtomicBool::new(false),
        }
    }

    pub async fn chosen_mask(&self) -> Option<PolicyMask> {
        *self.mask.lock().await
    }

    async fn set_uid_policy(&self, uid: i32, mask_code: &str) -> anyhow::Result<bool> {
        let uid_arg = uid.to_string();
        let result = self
            .assist
            .exec(
                "service",
                &["call", SERVICE_NAME, TRANSACTION_SET_UID_POLICY, "i32", &uid_arg, "i32", mask_code],
            )
            .await?;
        Ok(result.ok())
    }

    /// Probes which mask this platform accepts, trying `REJECT_ALL` first
    /// and falling back to `REJECT_METERED_BACKGROUND` on failure. Probes
    /// against a synthetic UID that is always a safe no-op to unset.
    async fn probe_mask(&self) -> anyhow::Result<PolicyMask> {
        const PROBE_UID: i32 = 0;
        if self.set_uid_policy(PROBE_UID, PolicyMask::RejectAll.code()).await? {
            self.set_uid_policy(PROBE_UID, POLICY_NONE).await.ok();
            return Ok(PolicyMask::RejectAll);
        }
        if self.set_uid_policy(PROBE_UID, PolicyMask::RejectMeteredBackground.code()).await? {
            self.set_uid_policy(PROBE_UID, POLICY_NONE).await.ok();
            return Ok(PolicyMask::RejectMeteredBackground);
        }
        anyhow::bail!("platform accepted neither REJECT_ALL nor REJECT_METERED_BACKGROUND")
    }
}

#[async_trait]
impl Backend for NetPolicyBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::NetPolicy
    }

    async fn start(&self) -> anyhow::Result<()> {
        let handle = self.assist.system_service_binder(SERVICE_NAME).await?;
        *self.handle.lock().await = Some(handle);
        self.active.store(true, Ordering::SeqCst);
        tracing::info!("net-policy backend started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let cached: Vec<i32> = self.cache.lock().await.drain().collect();
        for uid in cached {
            let _ = self.set_uid_policy(uid, POLICY_NONE).await;
        }
        *self.handle.lock().await = None;
        *self.mask.lock().await = None;
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn apply_rules(&self, inputs: &DeriveInputs<'_>) -> anyhow::Result<()> {
        let desired = netshield_derive::derive_block_set(inputs).internet;

        let mask = {
            let mut guard = self.mask.lock().await;
            if guard.is_none() {
                let probed = self.probe_mask().await?;
                if probed == PolicyMask::RejectMeteredBackground {
                    tracing::warn!("net-policy backend fell back to metered-only policy mask");
                }
                *guard = Some(probed);
            }
            guard.expect("just populated")
        };

        let mut cache = self.cache.lock().await;
        for &uid in desired.difference(&cache) {
            self.set_uid_policy(uid, mask.code()).await?;
        }
        for &uid in cache.difference(&desired) {
            self.set_uid_policy(uid, POLICY_NONE).await?;
        }
        *cache = desired;
        Ok(())
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn check_availability(&self) -> bool {
        self.assist.system_service_binder(SERVICE_NAME).await.is_ok()
    }

    fn health_warning(&self) -> Option<String> {
        match self.mask.try_lock().ok().and_then(|g| *g) {
            Some(PolicyMask::RejectMeteredBackground) => {
                Some("net-policy backend restricted to metered networks only".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netshield_model::{AppInfo, DefaultPolicy, FirewallRule, NetworkType, ScreenState};
    use netshield_ports::mock::InMemoryAssistChannel;

    fn app(uid: i32) -> AppInfo {
        AppInfo {
            uid,
            package_name: format!("pkg.{uid}"),
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
    async fn apply_probes_reject_all_first_when_supported() {
        let assist = Arc::new(InMemoryAssistChannel::default());
        *assist.scripted_exit_code.lock().unwrap() = 0;
        let backend = NetPolicyBackend::new(assist.clone());
        backend.start().await.unwrap();

        let apps = vec![app(10100)];
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
        assert_eq!(backend.chosen_mask().await, Some(PolicyMask::RejectAll));
    }

    #[tokio::test]
    async fn stop_resets_uids_and_clears_mask() {
        let assist = Arc::new(InMemoryAssistChannel::default());
        let backend = NetPolicyBackend::new(assist.clone());
        backend.start().await.unwrap();

        let apps = vec![app(10100)];
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
        assert_eq!(backend.chosen_mask().await, None);
        assert!(!backend.is_active().await);
    }

    #[tokio::test]
    async fn no_health_warning_before_any_apply() {
        let assist = Arc::new(InMemoryAssistChannel::default());
        let backend = NetPolicyBackend::new(assist);
        assert!(backend.health_warning().is_none());
    }
}
