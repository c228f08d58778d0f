//! Reference implementations of every `netshield-ports` trait (spec §6
//! ambient addition). These are the daemon's out-of-the-box collaborators,
//! not a tested part of the core's public contract — an embedder with a
//! real rule database, package manager, assist client, and UI replaces
//! each of these wholesale.

pub mod assist_channel;
pub mod notifications;
pub mod os_observer;
pub mod package_source;
pub mod persistent_store;
pub mod privilege_probe;
pub mod rule_store;

pub use assist_channel::ShellAssistChannel;
pub use notifications::TracingNotificationSink;
pub use os_observer::ChannelOsObserver;
pub use package_source::JsonPackageSource;
pub use persistent_store::FilePersistentStore;
pub use privilege_probe::ProcPrivilegeProbe;
pub use rule_store::JsonRuleStore;
