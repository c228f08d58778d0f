use async_trait::async_trait;

use crate::types::BackendType;
pub use crate::types::DeriveInputs;

/// Common contract implemented by all four enforcement mechanisms. Backends
/// know nothing about the `Manager`: they report failure by returning `Err`
/// from `start`/`apply_rules` or by flipping their own liveness flag, and
/// the Manager discovers that through the health monitor rather than a
/// callback into it.
#[async_trait]
pub trait Backend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    fn supports_granular_control(&self) -> bool {
        self.backend_type().supports_granular_control()
    }

    /// Starts the backend's enforcement mechanism (opens the device,
    /// installs the base chain, enables the platform deny-chain, …).
    /// Must be idempotent when already started.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stops the backend and releases any kernel-visible state it owns.
    /// Must tolerate "never started" / "already stopped" so it is safe to
    /// call unconditionally during teardown.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Derives and installs the desired enforcement state for the given
    /// inputs. A no-op for backends (like `VirtualDevice`) whose packet
    /// engine lives outside this process.
    async fn apply_rules(&self, inputs: &DeriveInputs<'_>) -> anyhow::Result<()>;

    /// Cheap liveness check: is this backend currently the one enforcing
    /// traffic? Distinct from `check_availability`, which asks whether the
    /// backend *could* run under current privileges.
    async fn is_active(&self) -> bool;

    /// Re-validates that this backend can still run under current
    /// privileges/platform. Must propagate cancellation since it may be
    /// invoked during teardown.
    async fn check_availability(&self) -> bool;

    /// Non-fatal degraded-mode warning surfaced by a backend whose
    /// enforcement fell back to a weaker guarantee than requested (spec
    /// §4.5 Open Question 4: `NetPolicy` falling back to the metered-only
    /// policy mask). `None` for backends with nothing to report.
    fn health_warning(&self) -> Option<String> {
        None
    }
}
