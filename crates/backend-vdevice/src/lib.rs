//! `VirtualDevice` backend (spec §4.6). Grounded on the teacher's
//! `app/tun.rs`/`tunstack/device.rs` TUN lifecycle, stripped of the
//! `smoltcp` packet engine — that engine is an external service out of
//! scope here. This backend only opens and closes the interface handle;
//! liveness is a flag the external packet-engine service flips itself, and
//! the Manager trusts it without probing the engine directly.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use netshield_model::{Backend, BackendType, DeriveInputs};

#[derive(Debug, Clone)]
pub struct VirtualDeviceConfig {
    pub tun_name: String,
    pub tun_ip: Ipv4Addr,
    pub tun_netmask: Ipv4Addr,
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self {
            tun_name: "netshield0".to_string(),
            tun_ip: Ipv4Addr::new(10, 233, 0, 1),
            tun_netmask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }
}

pub(crate) fn create_tun_device(config: &VirtualDeviceConfig) -> Result<tun::AsyncDevice> {
    let mut cfg = tun::Configuration::default();
    cfg.name(&config.tun_name)
        .address(config.tun_ip)
        .netmask(config.tun_netmask)
        .up();
    cfg.platform(|platform| {
        platform.packet_information(false);
    });
    tun::create_as_async(&cfg).context("failed to open TUN device")
}

pub struct VirtualDeviceBackend {
    config: VirtualDeviceConfig,
    device: Mutex<Option<tun::AsyncDevice>>,
    /// Flipped by the external packet-engine service, not by this backend;
    /// `service_running_handle` hands out the shared flag so that service
    /// can report in.
    service_running: Arc<AtomicBool>,
}

impl VirtualDeviceBackend {
    pub fn new(config: VirtualDeviceConfig) -> Self {
        Self { config, device: Mutex::new(None), service_running: Arc::new(AtomicBool::new(false)) }
    }

    /// Shared handle the external packet-engine service flips to report
    /// itself alive or dead. The Manager never calls this directly; it only
    /// reads `is_active` through the `Backend` trait.
    pub fn service_running_handle(&self) -> Arc<AtomicBool> {
        self.service_running.clone()
    }
}

#[async_trait]
impl Backend for VirtualDeviceBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::VirtualDevice
    }

    async fn start(&self) -> anyhow::Result<()> {
        let mut guard = self.device.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let device = create_tun_device(&self.config)?;
        *guard = Some(device);
        tracing::info!(tun_name = %self.config.tun_name, "virtual-device backend started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        *self.device.lock().await = None;
        self.service_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// No-op: the packet engine that would consume derived rules lives in
    /// the external service, out of scope for this core.
    async fn apply_rules(&self, _inputs: &DeriveInputs<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn is_active(&self) -> bool {
        self.service_running.load(Ordering::SeqCst)
    }

    async fn check_availability(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn is_active_reflects_external_service_flag_not_device_state() {
        let backend = VirtualDeviceBackend::new(VirtualDeviceConfig::default());
        assert!(!backend.is_active().await);

        let handle = backend.service_running_handle();
        handle.store(true, Ordering::SeqCst);
        assert!(backend.is_active().await);
    }

    #[tokio::test]
    async fn apply_rules_is_a_pure_no_op() {
        let backend = VirtualDeviceBackend::new(VirtualDeviceConfig::default());
        let rules = vec![];
        let apps = vec![];
        let inputs = DeriveInputs {
            rules: &rules,
            apps: &apps,
            network_type: netshield_model::NetworkType::Wifi,
            screen: netshield_model::ScreenState::ON,
            default_policy: netshield_model::DefaultPolicy::AllowAll,
            allow_critical: false,
            api_level: 30,
        };
        backend.apply_rules(&inputs).await.unwrap();
    }

    #[tokio::test]
    async fn check_availability_is_always_true() {
        let backend = VirtualDeviceBackend::new(VirtualDeviceConfig::default());
        assert!(backend.check_availability().await);
    }

    #[tokio::test]
    async fn stop_clears_device_and_service_flag_even_when_never_started() {
        let backend = VirtualDeviceBackend::new(VirtualDeviceConfig::default());
        backend.service_running_handle().store(true, Ordering::SeqCst);
        backend.stop().await.unwrap();
        assert!(!backend.is_active().await);
    }
}
