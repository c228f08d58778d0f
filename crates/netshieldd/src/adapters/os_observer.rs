//! `OsObserver` reference adapter: a `watch`-backed pair of channels an
//! embedder drives from whatever OS hooks it has (network-state broadcast
//! receiver, screen-on/off receiver). No portable cross-platform network/
//! screen tap exists in this workspace's dependency stack, so this adapter
//! just holds the channels and exposes setters — the daemon's own `main`
//! never calls the setters itself, matching `VirtualDeviceBackend`'s
//! externally-flipped liveness flag pattern.

use async_trait::async_trait;
use tokio::sync::watch;

use netshield_model::{NetworkType, ScreenState};
use netshield_ports::OsObserver;

pub struct ChannelOsObserver {
    network_tx: watch::Sender<NetworkType>,
    network_rx: watch::Receiver<NetworkType>,
    screen_tx: watch::Sender<ScreenState>,
    screen_rx: watch::Receiver<ScreenState>,
}

impl ChannelOsObserver {
    pub fn new(initial_network: NetworkType, initial_screen: ScreenState) -> Self {
        let (network_tx, network_rx) = watch::channel(initial_network);
        let (screen_tx, screen_rx) = watch::channel(initial_screen);
        Self { network_tx, network_rx, screen_tx, screen_rx }
    }

    pub fn set_network(&self, network: NetworkType) {
        self.network_tx.send_replace(network);
    }

    pub fn set_screen(&self, screen: ScreenState) {
        self.screen_tx.send_replace(screen);
    }
}

#[async_trait]
impl OsObserver for ChannelOsObserver {
    fn observe_network_type(&self) -> watch::Receiver<NetworkType> {
        self.network_rx.clone()
    }

    fn observe_screen(&self) -> watch::Receiver<ScreenState> {
        self.screen_rx.clone()
    }
}
