//! `PackageSource` reference adapter: reads a JSON snapshot of installed
//! applications from the state directory. A real embedder enumerates
//! installed packages from the OS package manager directly (out of scope
//! per spec §1); this adapter exists so the daemon has something to derive
//! policy against without that integration.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use netshield_model::AppInfo;
use netshield_ports::PackageSource;

pub struct JsonPackageSource {
    path: PathBuf,
}

impl JsonPackageSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl PackageSource for JsonPackageSource {
    async fn list_network_apps(&self) -> Result<Vec<AppInfo>> {
        let Ok(data) = std::fs::read(&self.path) else {
            return Ok(Vec::new());
        };
        let apps: Vec<AppInfo> = serde_json::from_slice(&data)?;
        Ok(apps.into_iter().filter(|a| a.requests_network_permission).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_empty_list() {
        let source = JsonPackageSource::new(PathBuf::from("/nonexistent/apps.json"));
        assert!(source.list_network_apps().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filters_apps_without_network_permission() {
        let path = std::env::temp_dir().join(format!("netshield-apps-{}.json", std::process::id()));
        let apps = vec![
            AppInfo { uid: 1, package_name: "a".into(), profile_id: 0, requests_network_permission: true, declares_vpn_service: false, is_system_critical: false },
            AppInfo { uid: 2, package_name: "b".into(), profile_id: 0, requests_network_permission: false, declares_vpn_service: false, is_system_critical: false },
        ];
        std::fs::write(&path, serde_json::to_vec(&apps).unwrap()).unwrap();
        let source = JsonPackageSource::new(path.clone());
        let result = source.list_network_apps().await.unwrap();
        assert_eq!(result.len(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
