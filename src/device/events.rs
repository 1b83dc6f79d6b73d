use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant},
};

use crate::models::DeviceInfo;

/// How long a scan listens for advertisements before stopping on its own.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(3);

/// Bluetooth events forwarded from the SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "device")]
pub enum DeviceEvent {
    Found(DeviceInfo),
    Connected(DeviceInfo),
    ConnectionFailed(DeviceInfo),
    Disconnected(DeviceInfo),
}

impl DeviceEvent {
    pub fn device(&self) -> &DeviceInfo {
        match self {
            DeviceEvent::Found(device)
            | DeviceEvent::Connected(device)
            | DeviceEvent::ConnectionFailed(device)
            | DeviceEvent::Disconnected(device) => device,
        }
    }
}

/// Devices seen on the radio, one entry per MAC address.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceInfo>,
    connected: Option<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event in. Returns true when the event told us something new.
    pub fn apply(&mut self, event: &DeviceEvent) -> bool {
        match event {
            DeviceEvent::Found(device) => {
                if self.devices.iter().any(|known| known.mac == device.mac) {
                    return false;
                }
                info!("Found device {} ({})", device.name, device.mac);
                self.devices.push(device.clone());
                true
            }
            DeviceEvent::Connected(device) => {
                self.connected = Some(device.mac.clone());
                true
            }
            DeviceEvent::ConnectionFailed(device) => {
                debug!("Connection to {} failed", device.mac);
                false
            }
            DeviceEvent::Disconnected(device) => {
                if self.connected.as_deref() == Some(device.mac.as_str()) {
                    self.connected = None;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn connected(&self) -> Option<&str> {
        self.connected.as_deref()
    }
}

/// Collects the devices advertised during `window`. Stops early if the SDK
/// side of the channel goes away.
pub async fn discover(
    events: &mut mpsc::Receiver<DeviceEvent>,
    window: Duration,
) -> Vec<DeviceInfo> {
    let mut registry = DeviceRegistry::new();
    let deadline = Instant::now() + window;

    loop {
        match time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => {
                registry.apply(&event);
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }

    info!("Scan finished, {} device(s) found", registry.devices().len());
    registry.devices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wt(mac: &str) -> DeviceInfo {
        DeviceInfo::new("WT901BLE68", mac)
    }

    #[test]
    fn registry_deduplicates_by_mac() {
        let mut registry = DeviceRegistry::new();

        assert!(registry.apply(&DeviceEvent::Found(wt("AA"))));
        assert!(!registry.apply(&DeviceEvent::Found(wt("AA"))));
        assert!(registry.apply(&DeviceEvent::Found(wt("BB"))));

        assert_eq!(registry.devices().len(), 2);
    }

    #[test]
    fn registry_tracks_connection() {
        let mut registry = DeviceRegistry::new();
        registry.apply(&DeviceEvent::Connected(wt("AA")));
        assert_eq!(registry.connected(), Some("AA"));

        assert!(!registry.apply(&DeviceEvent::Disconnected(wt("BB"))));
        assert!(registry.apply(&DeviceEvent::Disconnected(wt("AA"))));
        assert_eq!(registry.connected(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn discover_stops_after_window() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(DeviceEvent::Found(wt("AA"))).await.unwrap();
        tx.send(DeviceEvent::Found(wt("AA"))).await.unwrap();
        tx.send(DeviceEvent::Found(wt("BB"))).await.unwrap();

        // Sender stays alive, so only the window ends the scan.
        let found = discover(&mut rx, DEFAULT_SCAN_WINDOW).await;

        assert_eq!(found, vec![wt("AA"), wt("BB")]);
        drop(tx);
    }

    #[tokio::test]
    async fn discover_stops_when_channel_closes() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(DeviceEvent::Found(wt("CC"))).await.unwrap();
        drop(tx);

        let found = discover(&mut rx, Duration::from_secs(60)).await;
        assert_eq!(found, vec![wt("CC")]);
    }
}
