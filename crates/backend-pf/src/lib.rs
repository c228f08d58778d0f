//! `PacketFilter` backend (spec §4.3): owner-UID DROP rules in a
//! process-private nftables chain, applied as a diff against a cached
//! `BlockSet` so a re-derivation pass only issues commands for the deltas.

mod nft;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use netshield_model::{Backend, BackendType, BlockSet, DeriveInputs};
use netshield_ports::PrivilegeProbe;
use netshield_util::CommandRunner;

/// The three add/remove deltas between a desired and cached `BlockSet`,
/// computed as a pure function so diff correctness (property 3) is
/// testable without any kernel I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSetDiff {
    pub add_internet: Vec<i32>,
    pub remove_internet: Vec<i32>,
    pub add_lan: Vec<i32>,
    pub remove_lan: Vec<i32>,
}

impl BlockSetDiff {
    pub fn is_empty(&self) -> bool {
        self.add_internet.is_empty()
            && self.remove_internet.is_empty()
            && self.add_lan.is_empty()
            && self.remove_lan.is_empty()
    }
}

pub fn diff_block_set(desired: &BlockSet, cached: &BlockSet) -> BlockSetDiff {
    BlockSetDiff {
        add_internet: desired.internet.difference(&cached.internet).copied().collect(),
        remove_internet: cached.internet.difference(&desired.internet).copied().collect(),
        add_lan: desired.lan.difference(&cached.lan).copied().collect(),
        remove_lan: cached.lan.difference(&desired.lan).copied().collect(),
    }
}

pub struct PacketFilterBackend {
    privilege_probe: Arc<dyn PrivilegeProbe>,
    runner: CommandRunner,
    cache: Mutex<BlockSet>,
    active: AtomicBool,
}

impl PacketFilterBackend {
    pub fn new(privilege_probe: Arc<dyn PrivilegeProbe>, runner: CommandRunner) -> Self {
        Self {
            privilege_probe,
            runner,
            cache: Mutex::new(BlockSet::default()),
            active: AtomicBool::new(false),
        }
    }

    /// Snapshot of the currently-enforced set, used by tests and by the
    /// health monitor's diagnostics.
    pub async fn cached_block_set(&self) -> BlockSet {
        self.cache.lock().await.clone()
    }

    async fn mutate_element(&self, set: &'static str, uid: i32, add: bool) -> anyhow::Result<()> {
        let runner = self.runner.clone();
        netshield_util::non_cancellable(async move {
            if add {
                nft::add_element(&runner, set, uid)
            } else {
                nft::delete_element(&runner, set, uid)
            }
        })
        .await?
    }
}

#[async_trait]
impl Backend for PacketFilterBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::PacketFilter
    }

    async fn start(&self) -> anyhow::Result<()> {
        let runner = self.runner.clone();
        netshield_util::non_cancellable(async move {
            if let Err(native_err) = nft::bootstrap_native() {
                if netshield_util::is_root() && nft::find_nft_binary() {
                    tracing::debug!(%native_err, "native nft bootstrap failed, falling back to shell");
                    nft::bootstrap_structural_cmd(&runner)?;
                } else {
                    return Err(native_err);
                }
            }
            // Always runs, regardless of which path created the table and
            // chains: the native batch path has no set-creation step, so
            // the membership sets and their drop rules only ever exist via
            // this shell-driven step.
            nft::bootstrap_sets_and_rules(&runner)?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        self.active.store(true, Ordering::SeqCst);
        tracing::info!("packet-filter backend started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let runner = self.runner.clone();
        netshield_util::non_cancellable(async move {
            if nft::delete_table_native().is_err() && netshield_util::is_root() && nft::find_nft_binary() {
                let _ = nft::delete_table_cmd(&runner);
            }
        })
        .await
        .ok();
        self.active.store(false, Ordering::SeqCst);
        *self.cache.lock().await = BlockSet::default();
        Ok(())
    }

    async fn apply_rules(&self, inputs: &DeriveInputs<'_>) -> anyhow::Result<()> {
        let desired = netshield_derive::derive_block_set(inputs);
        let mut cache = self.cache.lock().await;
        let diff = diff_block_set(&desired, &cache);

        for &uid in &diff.add_internet {
            self.mutate_element(nft::SET_BLOCKED, uid, true).await?;
        }
        for &uid in &diff.remove_internet {
            self.mutate_element(nft::SET_BLOCKED, uid, false).await?;
        }
        for &uid in &diff.add_lan {
            self.mutate_element(nft::SET_BLOCKED_LAN, uid, true).await?;
        }
        for &uid in &diff.remove_lan {
            self.mutate_element(nft::SET_BLOCKED_LAN, uid, false).await?;
        }

        *cache = desired;
        Ok(())
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn check_availability(&self) -> bool {
        let privileges = self.privilege_probe.recheck().await;
        privileges.has_root_equivalent() && nft::find_nft_binary()
    }
}
