use serde::{Deserialize, Serialize};

use crate::types::{BackendType, DefaultPolicy, Mode};

/// The persisted scalars the core reads at startup, loaded by the daemon
/// from a TOML file with CLI overrides layered on top (the same
/// parse-then-fall-back-to-defaults shape the teacher's `RunArgs` uses for
/// its own flags).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetshieldConfig {
    pub firewall_mode: Mode,
    pub default_policy: DefaultPolicy,
    pub allow_critical: bool,
}

impl Default for NetshieldConfig {
    fn default() -> Self {
        Self {
            firewall_mode: Mode::Auto,
            default_policy: DefaultPolicy::AllowAll,
            allow_critical: false,
        }
    }
}

/// Cross-process truth about liveness, stored alongside `NetshieldConfig`
/// in the same persisted key/value layout. These are the only facts a
/// freshly-started process can trust without re-probing the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedFlags {
    pub firewall_enabled: bool,
    pub privileged_service_running: bool,
    pub privileged_backend_type: Option<BackendType>,
    pub virtual_device_service_running: bool,
    pub is_firewall_down: bool,
}
