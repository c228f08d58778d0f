//! `NotificationSink` reference adapter: logs every user-facing
//! notification via `tracing` instead of rendering a real UI toast/banner,
//! which is out of scope per spec §1.

use netshield_model::BackendType;
use netshield_ports::NotificationSink;

pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn show_vpn_permission_required(&self) {
        tracing::warn!("notification: virtual-device permission required");
    }

    fn show_backend_failed(&self, backend: BackendType) {
        tracing::warn!(%backend, "notification: backend failed");
    }

    fn show_vpn_conflict(&self) {
        tracing::warn!("notification: another VPN is already active");
    }

    fn dismiss(&self, id: &str) {
        tracing::debug!(id, "notification: dismissed");
    }
}
