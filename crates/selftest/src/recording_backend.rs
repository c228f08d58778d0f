//! A `Backend` that records the derived enforcement state instead of
//! touching the kernel, so the scenarios below exercise the real
//! `Manager`/`Planner`/`derive` stack without requiring root or a real
//! device. Grounded on the teacher's `MockFirewall`-style recording double
//! (`app/run.rs`'s test module), generalized to the four backend types.

use std::sync::Mutex;

use async_trait::async_trait;

use netshield_model::{AppliedPolicy, Backend, BackendType, BlockSet, DeriveInputs};

pub struct RecordingBackend {
    backend_type: BackendType,
    active: Mutex<bool>,
    last_block_set: Mutex<Option<BlockSet>>,
    last_applied_policy: Mutex<Option<AppliedPolicy>>,
}

impl RecordingBackend {
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            active: Mutex::new(false),
            last_block_set: Mutex::new(None),
            last_applied_policy: Mutex::new(None),
        }
    }

    pub fn last_block_set(&self) -> Option<BlockSet> {
        self.last_block_set.lock().expect("last_block_set").clone()
    }

    pub fn last_applied_policy(&self) -> Option<AppliedPolicy> {
        self.last_applied_policy.lock().expect("last_applied_policy").clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    async fn start(&self) -> anyhow::Result<()> {
        *self.active.lock().expect("active") = true;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        *self.active.lock().expect("active") = false;
        Ok(())
    }

    async fn apply_rules(&self, inputs: &DeriveInputs<'_>) -> anyhow::Result<()> {
        if self.backend_type.supports_granular_control() {
            *self.last_block_set.lock().expect("last_block_set") =
                Some(netshield_derive::derive_block_set(inputs));
        } else {
            *self.last_applied_policy.lock().expect("last_applied_policy") =
                Some(netshield_derive::derive_applied_policy(inputs));
        }
        Ok(())
    }

    async fn is_active(&self) -> bool {
        *self.active.lock().expect("active")
    }

    async fn check_availability(&self) -> bool {
        true
    }
}
