//! Health monitoring, privilege-change de-duplication, and debounced
//! rule/state fan-in (spec §4.8, §4.9, §5). Grounded on the `tokio::select!`
//! polling loop in the teacher's `run.rs` combined with the
//! `AtomicBool`/interval-timer idiom in its `tauri-app/connection.rs`.

pub mod cadence;
pub mod debounce;
pub mod dedup;
pub mod privileged;
pub mod vdevice;

pub use cadence::{Cadence, CadenceConfig, CadenceState};
pub use debounce::{UnitStream, spawn_debounced_trigger, unit_stream};
pub use dedup::PrivilegeChangeDedup;
pub use privileged::{MonitorEvent, spawn_privileged_monitor};
pub use vdevice::spawn_virtual_device_monitor;
