//! `RuleStore` reference adapter: a JSON file under the daemon's state
//! directory, polled for external edits. Grounded on `proxyvpn-state`'s
//! `StateStore`: `serde_json::to_vec_pretty` + `0600` permissions for the
//! write path, `fs::read` + `serde_json::from_slice` for the read path.
//! Embedders with a real rule database replace this wholesale; it exists so
//! `netshieldd` is runnable end-to-end out of the box.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use netshield_model::FirewallRule;
use netshield_ports::RuleStore;
use netshield_util::set_permissions_0600;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct JsonRuleStore {
    path: PathBuf,
    tx: watch::Sender<Vec<FirewallRule>>,
    rx: watch::Receiver<Vec<FirewallRule>>,
}

impl JsonRuleStore {
    pub fn open(path: PathBuf, cancel: CancellationToken) -> Result<Self> {
        let initial = read_rules_file(&path).unwrap_or_default();
        let (tx, rx) = watch::channel(initial);
        let store = Self { path, tx, rx };
        store.spawn_poll_task(cancel);
        Ok(store)
    }

    fn spawn_poll_task(&self, cancel: CancellationToken) {
        let path = self.path.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut last_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
                let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                if mtime == last_mtime {
                    continue;
                }
                last_mtime = mtime;
                if let Some(rules) = read_rules_file(&path) {
                    tx.send_replace(rules);
                }
            }
        });
    }
}

fn read_rules_file(path: &Path) -> Option<Vec<FirewallRule>> {
    let data = std::fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

fn write_rules_file(path: &Path, rules: &[FirewallRule]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create rule store directory")?;
    }
    let data = serde_json::to_vec_pretty(rules).context("serialize rules")?;
    std::fs::write(path, data).context("write rule store file")?;
    set_permissions_0600(path)?;
    Ok(())
}

#[async_trait]
impl RuleStore for JsonRuleStore {
    fn stream_rules(&self) -> watch::Receiver<Vec<FirewallRule>> {
        self.rx.clone()
    }

    async fn read_rules_once(&self) -> Result<Vec<FirewallRule>> {
        Ok(read_rules_file(&self.path).unwrap_or_default())
    }

    async fn delete_all(&self) -> Result<()> {
        write_rules_file(&self.path, &[])?;
        self.tx.send_replace(Vec::new());
        Ok(())
    }

    async fn upsert_many(&self, rules: Vec<FirewallRule>) -> Result<()> {
        let mut current = read_rules_file(&self.path).unwrap_or_default();
        for rule in rules {
            if let Some(existing) = current
                .iter_mut()
                .find(|r| r.uid == rule.uid && r.package_name == rule.package_name)
            {
                *existing = rule;
            } else {
                current.push(rule);
            }
        }
        write_rules_file(&self.path, &current)?;
        self.tx.send_replace(current);
        Ok(())
    }
}
