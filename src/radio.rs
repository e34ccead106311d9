use btleplug::api::{Central as _, CentralEvent, CentralState, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, PeripheralId};
use futures::StreamExt as _;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::registry::DeviceId;

/// One advertisement heard from a peripheral.
#[derive(Clone, Debug)]
pub struct Discovery {
    pub id: DeviceId,
    pub name: Option<String>,
    pub rssi: i16,
    pub seen_at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

impl From<CentralState> for RadioState {
    fn from(state: CentralState) -> Self {
        match state {
            CentralState::PoweredOn => RadioState::PoweredOn,
            CentralState::PoweredOff => RadioState::PoweredOff,
            _ => RadioState::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub enum RadioEvent {
    Discovered(Discovery),
    StateChanged(RadioState),
}

/// Scan control for a radio whose events arrive on a separate channel.
pub trait RadioSource {
    async fn start_scanning(&self) -> anyhow::Result<()>;
    async fn stop_scanning(&self) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct BtleRadio {
    adapter: Adapter,
}

impl BtleRadio {
    pub fn new(adapter: Adapter) -> Self {
        BtleRadio { adapter }
    }

    /// Forwards adapter events to `tx` until either side goes away.
    ///
    /// The adapter's current power state is sent first, since an adapter that
    /// is already on never reports a state change.
    pub async fn pump_events(self, tx: mpsc::Sender<RadioEvent>) -> anyhow::Result<()> {
        let mut events = self.adapter.events().await?;

        match self.adapter.adapter_state().await {
            Ok(state) => {
                if tx.send(RadioEvent::StateChanged(state.into())).await.is_err() {
                    return Ok(());
                }
            }
            Err(err) => warn!("Could not read adapter state: {}", err),
        }

        while let Some(event) = events.next().await {
            let radio_event = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    match self.discovery(&id).await {
                        Ok(Some(discovery)) => RadioEvent::Discovered(discovery),
                        Ok(None) => continue,
                        Err(err) => {
                            warn!("Could not read properties of {:?}: {}", id, err);
                            continue;
                        }
                    }
                }
                CentralEvent::StateUpdate(state) => RadioEvent::StateChanged(state.into()),
                _ => continue,
            };

            if tx.send(radio_event).await.is_err() {
                debug!("Radio event receiver closed");
                return Ok(());
            }
        }

        info!("No more radio events");
        Ok(())
    }

    async fn discovery(&self, id: &PeripheralId) -> btleplug::Result<Option<Discovery>> {
        let seen_at = Instant::now();
        let peripheral = self.adapter.peripheral(id).await?;
        let Some(properties) = peripheral.properties().await? else {
            return Ok(None);
        };
        let Some(rssi) = properties.rssi else {
            debug!("No RSSI for {:?}, skipping", id);
            return Ok(None);
        };

        Ok(Some(Discovery {
            id: DeviceId(id.to_string()),
            name: properties.local_name,
            rssi,
            seen_at,
        }))
    }
}

impl RadioSource for BtleRadio {
    async fn start_scanning(&self) -> anyhow::Result<()> {
        // No service filter; BlueZ keeps reporting duplicates as DeviceUpdated.
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scanning(&self) -> anyhow::Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }
}
