//! Reference daemon wiring the firewall control core against the
//! out-of-the-box adapters in `adapters/` (spec §1 ambient addition: "the
//! daemon provides a default, swappable implementation of each external
//! contract"). Grounded on the teacher's `proxyvpn` bin: a thin `main` that
//! parses CLI args and hands off to an async `run`, plus the
//! `tokio::signal::ctrl_c` shutdown pattern from `app/run.rs`.

mod adapters;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use netshield_backend_vdevice::VirtualDeviceConfig;
use netshield_cli::{apply_overrides, parse_cli};
use netshield_manager::{ManagerDeps, NetshieldManager, production_backend_factory};
use netshield_model::{NetworkType, ScreenState};
use netshield_planner::PlatformCapabilities;
use netshield_util::CommandRunner;

use adapters::{
    ChannelOsObserver, FilePersistentStore, JsonPackageSource, JsonRuleStore, ProcPrivilegeProbe,
    ShellAssistChannel, TracingNotificationSink,
};

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = parse_cli();
    let args = cli.args;

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    std::fs::create_dir_all(&args.state_dir)?;
    let persistent_store = Arc::new(FilePersistentStore::new(
        args.config.clone(),
        args.state_dir.join("flags.json"),
    ));

    let loaded_config = persistent_store.load_config().await.unwrap_or_default();
    let config = apply_overrides(loaded_config, &args);
    persistent_store.save_config(&config).await?;
    let flags = persistent_store.load_flags().await.unwrap_or_default();

    let root_cancel = CancellationToken::new();

    let privilege_probe: Arc<ProcPrivilegeProbe> = Arc::new(ProcPrivilegeProbe::start(root_cancel.clone()));
    let rule_store = Arc::new(JsonRuleStore::open(args.state_dir.join("rules.json"), root_cancel.clone())?);
    let package_source = Arc::new(JsonPackageSource::new(args.state_dir.join("apps.json")));
    let os_observer = Arc::new(ChannelOsObserver::new(NetworkType::Wifi, ScreenState::ON));
    let notifications = Arc::new(TracingNotificationSink);
    let assist_channel = Arc::new(ShellAssistChannel);
    let command_runner = CommandRunner::new(args.verbose, args.dry_run);
    let vdevice_config = VirtualDeviceConfig::default();

    let platform = PlatformCapabilities {
        packet_filter_tool_present: netshield_util::find_in_path("nft").is_some(),
        policy_chain_supported: true,
    };

    let backend_factory = production_backend_factory(
        privilege_probe.clone(),
        assist_channel.clone(),
        command_runner.clone(),
        vdevice_config.clone(),
    );

    let deps = ManagerDeps {
        rule_store,
        package_source,
        privilege_probe,
        assist_channel,
        os_observer,
        notifications,
        persistent_store,
        platform,
        vdevice_config,
        command_runner,
        backend_factory,
    };

    let manager = NetshieldManager::new(deps, config, flags.clone());

    if args.autostart || flags.firewall_enabled {
        if let Err(err) = manager.start(None).await {
            tracing::warn!(%err, "initial start did not succeed; remaining in Error/firewall-down state");
        }
    }

    tracing::info!("netshieldd running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutting down");

    manager.stop().await;
    manager.shutdown();
    root_cancel.cancel();
    Ok(())
}
