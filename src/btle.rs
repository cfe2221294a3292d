use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CharPropFlags, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral};
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{Advertisement, Link, NotificationStream, Transport};


const SERVICE_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
/// How long to listen when asked to connect to a peripheral the adapter has not seen yet.
const LOOKUP_SCAN: Duration = Duration::from_secs(3);

/// btleplug on the first Bluetooth adapter of the machine.
pub struct BtleTransport {
    adapter: Adapter,
    connect_timeout: Duration,
}

impl BtleTransport {
    pub async fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter_list = manager.adapters().await?;

        for adapter in adapter_list.iter() {
            debug!(
                "Adapter: {}",
                adapter.adapter_info().await.unwrap_or("No name adapter".to_string())
            );
        }
        // TODO: let the user pick when there is more than one adapter
        let adapter = adapter_list.into_iter().next().ok_or(TransportError::NoAdapter)?;

        Ok(BtleTransport {
            adapter,
            connect_timeout,
        })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<PlatformPeripheral>, TransportError> {
        // the list may contain peripherals that are no longer in range
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals.into_iter().find(|p| p.id().to_string() == address))
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn discover(&self, timeout: Duration) -> Result<Vec<Advertisement>, TransportError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(timeout).await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Could not stop scan: {err}");
        }

        let mut found = vec![];
        for peripheral in self.adapter.peripherals().await? {
            let name = match peripheral.properties().await {
                Ok(Some(properties)) => properties.local_name,
                _ => None,
            };
            found.push(Advertisement {
                name,
                address: peripheral.id().to_string(),
            });
        }
        Ok(found)
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn Link>, TransportError> {
        let peripheral = match self.find_peripheral(address).await? {
            Some(peripheral) => peripheral,
            None => {
                debug!(%address, "Peripheral not known yet, scanning for it");
                self.discover(LOOKUP_SCAN).await?;
                self.find_peripheral(address)
                    .await?
                    .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))?
            }
        };

        if !peripheral.is_connected().await? {
            tokio::time::timeout(self.connect_timeout, peripheral.connect())
                .await
                .map_err(|_| TransportError::Timeout("BLE connect"))??;
        }
        if !peripheral.is_connected().await? {
            return Err(TransportError::Disconnected);
        }

        tokio::time::timeout(SERVICE_DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| TransportError::Timeout("service discovery"))??;
        info!(%address, "Services discovered");

        Ok(Arc::new(BtleLink { peripheral }))
    }
}

struct BtleLink {
    peripheral: PlatformPeripheral,
}

#[async_trait]
impl Link for BtleLink {
    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream, TransportError> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.properties.contains(CharPropFlags::NOTIFY))
            .ok_or(TransportError::CharacteristicNotFound(characteristic))?;

        debug!("Subscribing to characteristic {:?}", target.uuid);
        self.peripheral.subscribe(&target).await?;

        let notifications = self.peripheral.notifications().await?;
        Ok(notifications
            .filter_map(move |data| async move { (data.uuid == characteristic).then_some(data.value) })
            .boxed())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}
