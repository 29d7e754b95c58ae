//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ reports advertisements as device property changes, so the scan runs
//! discovery with duplicate data enabled and re-reads the service data of a
//! device every time it is reported as added or changed.

use super::{Advertisement, AdvertisementCallback, Radio, ScanError, ScanFuture, ServiceData, uuid_tag};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::{StreamExt, pin_mut};
use log::debug;
use std::time::Duration;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// BlueZ adapter name for an adapter index.
fn adapter_name(adapter: u16) -> String {
    format!("hci{adapter}")
}

/// Radio backed by a BlueZ D-Bus session.
pub struct BluerRadio {
    session: Session,
}

impl BluerRadio {
    /// Connect to the BlueZ daemon.
    pub async fn new() -> Result<Self, ScanError> {
        Ok(Self {
            session: Session::new().await?,
        })
    }

    async fn powered_adapter(&self, adapter: u16) -> Result<Adapter, ScanError> {
        let adapter = self.session.adapter(&adapter_name(adapter))?;
        adapter.set_powered(true).await?;
        Ok(adapter)
    }

    async fn run_scan(
        &self,
        adapter_index: u16,
        window: Duration,
        on_advertisement: AdvertisementCallback,
    ) -> Result<(), ScanError> {
        let adapter = self.powered_adapter(adapter_index).await?;

        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            })
            .await?;

        // Discovery stops when the stream is dropped.
        let events = adapter.discover_devices_with_changes().await?;
        pin_mut!(events);

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return Ok(()),
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        match read_advertisement(&adapter, address).await {
                            Ok(Some(advertisement)) => on_advertisement(advertisement),
                            Ok(None) => {}
                            Err(e) => debug!("cannot read service data of {address}: {e}"),
                        }
                    }
                    Some(_) => {}
                    None => return Err(ScanError::Stopped(adapter_index)),
                },
            }
        }
    }
}

/// Whether BlueZ heard the device during the current discovery.
///
/// A new discovery stream also lists cached devices that may be out of range;
/// BlueZ reports no RSSI for those.
fn in_range(rssi: Option<i16>) -> bool {
    rssi.is_some()
}

/// Read the current service data of a device as an [`Advertisement`].
///
/// Returns `Ok(None)` for devices that are out of range or have no service
/// data.
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<Advertisement>, ScanError> {
    let device = adapter.device(address)?;

    if !in_range(device.rssi().await?) {
        debug!("{address}: cached by BlueZ but not in range");
        return Ok(None);
    }

    let service_data = match device.service_data().await? {
        Some(data) if !data.is_empty() => data,
        _ => return Ok(None),
    };

    let mut records: Vec<ServiceData> = service_data
        .into_iter()
        .map(|(uuid, data)| ServiceData {
            uuid: uuid_tag(uuid.as_u128()),
            data,
        })
        .collect();
    records.sort_by(|a, b| a.uuid.cmp(&b.uuid));

    Ok(Some(Advertisement {
        address: address.to_string(),
        service_data: records,
    }))
}

impl Radio for BluerRadio {
    fn probe(&self, adapter: u16) -> ScanFuture<'_> {
        Box::pin(async move { self.powered_adapter(adapter).await.map(|_| ()) })
    }

    fn scan(
        &self,
        adapter: u16,
        window: Duration,
        on_advertisement: AdvertisementCallback,
    ) -> ScanFuture<'_> {
        Box::pin(self.run_scan(adapter, window, on_advertisement))
    }
}
