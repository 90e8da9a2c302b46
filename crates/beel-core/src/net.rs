//! Network reachability monitoring.
//!
//! "Online" is the conjunction of two signals: the device reports a
//! connection AND that connection can reach the internet. Either alone is
//! insufficient (a device can sit on Wi-Fi with no upstream), so both
//! flags stay readable on [`NetworkStatus`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    None,
    Unknown,
}

/// One observation from the platform connectivity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivitySample {
    pub connected: bool,
    pub internet_reachable: bool,
    pub connection_type: ConnectionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub is_online: bool,
    pub is_connected: bool,
    pub internet_reachable: bool,
    pub connection_type: ConnectionType,
}

impl NetworkStatus {
    pub fn offline() -> Self {
        Self {
            is_online: false,
            is_connected: false,
            internet_reachable: false,
            connection_type: ConnectionType::Unknown,
        }
    }

    pub fn is_wifi(&self) -> bool {
        self.connection_type == ConnectionType::Wifi
    }

    pub fn is_cellular(&self) -> bool {
        self.connection_type == ConnectionType::Cellular
    }
}

impl From<ConnectivitySample> for NetworkStatus {
    fn from(sample: ConnectivitySample) -> Self {
        Self {
            is_online: sample.connected && sample.internet_reachable,
            is_connected: sample.connected,
            internet_reachable: sample.internet_reachable,
            connection_type: sample.connection_type,
        }
    }
}

/// Status transition observed by the monitor.
#[derive(Debug, Clone, Copy)]
pub enum NetworkEvent {
    CameOnline(NetworkStatus),
    WentOffline(NetworkStatus),
    Changed(NetworkStatus),
}

/// Fired once per offline-to-online transition, after the settle delay.
#[derive(Debug, Clone, Copy)]
pub struct SyncTrigger;

/// Source of connectivity observations. The daemon polls [`HttpProbe`];
/// platform layers with native connectivity callbacks push samples into
/// [`NetworkMonitor::report`] directly.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn sample(&self) -> ConnectivitySample;
}

/// Watches connectivity and publishes transitions. One instance per
/// application; constructible, no global state.
pub struct NetworkMonitor {
    probe: Box<dyn ConnectivityProbe>,
    status: Mutex<NetworkStatus>,
    events: broadcast::Sender<NetworkEvent>,
    triggers: broadcast::Sender<SyncTrigger>,
    settle_delay: Duration,
}

impl NetworkMonitor {
    pub fn new(probe: Box<dyn ConnectivityProbe>, settle_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(32);
        let (triggers, _) = broadcast::channel(8);
        Self {
            probe,
            status: Mutex::new(NetworkStatus::offline()),
            events,
            triggers,
            settle_delay,
        }
    }

    /// Last observed status without touching the probe.
    pub fn current_status(&self) -> NetworkStatus {
        *self.status.lock().unwrap()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    pub fn sync_triggers(&self) -> broadcast::Receiver<SyncTrigger> {
        self.triggers.subscribe()
    }

    /// Probe once and fold the observation in.
    pub async fn check_now(&self) -> NetworkStatus {
        let sample = self.probe.sample().await;
        self.report(sample)
    }

    /// Fold one connectivity observation into the monitor state, emitting
    /// transition events. An offline-to-online transition schedules a sync
    /// trigger after the settle delay; reconnecting links often flap, so
    /// the trigger must not fire immediately.
    pub fn report(&self, sample: ConnectivitySample) -> NetworkStatus {
        let status: NetworkStatus = sample.into();
        let previous = {
            let mut guard = self.status.lock().unwrap();
            std::mem::replace(&mut *guard, status)
        };

        if previous != status {
            debug!(
                is_connected = status.is_connected,
                internet_reachable = status.internet_reachable,
                connection_type = ?status.connection_type,
                "network status changed"
            );
            let event = if status.is_online && !previous.is_online {
                NetworkEvent::CameOnline(status)
            } else if previous.is_online && !status.is_online {
                NetworkEvent::WentOffline(status)
            } else {
                NetworkEvent::Changed(status)
            };
            let _ = self.events.send(event);
        }

        if status.is_online && !previous.is_online {
            let triggers = self.triggers.clone();
            let settle = self.settle_delay;
            tokio::spawn(async move {
                tokio::time::sleep(settle).await;
                let _ = triggers.send(SyncTrigger);
            });
        }

        status
    }

    /// Poll the probe forever. Spawned by the daemon.
    pub async fn run(self: std::sync::Arc<Self>, interval: Duration) {
        loop {
            self.check_now().await;
            tokio::time::sleep(interval).await;
        }
    }
}

/// Reachability probe backed by an HTTP HEAD request against a
/// connectivity-check URL. A transport error reads as fully offline; the
/// probe cannot tell a missing interface from a dead upstream, platforms
/// that can should push samples via [`NetworkMonitor::report`].
pub struct HttpProbe {
    client: reqwest::Client,
    probe_url: String,
}

impl HttpProbe {
    pub fn new(probe_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            probe_url: probe_url.into(),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn sample(&self) -> ConnectivitySample {
        match self.client.head(&self.probe_url).send().await {
            Ok(response) => ConnectivitySample {
                connected: true,
                internet_reachable: response.status().is_success()
                    || response.status().is_redirection(),
                connection_type: ConnectionType::Unknown,
            },
            Err(_) => ConnectivitySample {
                connected: false,
                internet_reachable: false,
                connection_type: ConnectionType::Unknown,
            },
        }
    }
}
