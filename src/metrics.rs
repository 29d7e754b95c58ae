//! Last-known readings per device.
//!
//! One [`MetricState`] is created at startup and shared (`Arc`) between the
//! dispatch workers that write to it and the metrics endpoint that reads it.

use crate::mac_address::MacAddress;
use crate::reading::SensorReading;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Latest values and counters for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMetrics {
    /// Raw temperature, tenths of a degree Celsius
    pub temperature: u8,
    pub humidity: u8,
    pub battery: u8,
    /// Number of readings applied for this device
    pub received: u64,
    pub last_received: SystemTime,
}

impl DeviceMetrics {
    /// Seconds since the Unix epoch of the last reading.
    pub fn last_received_unix(&self) -> u64 {
        self.last_received
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Shared, concurrently updatable metric store.
#[derive(Debug, Default)]
pub struct MetricState {
    devices: RwLock<BTreeMap<MacAddress, DeviceMetrics>>,
    dropped: AtomicU64,
    scan_restarts: AtomicU64,
}

impl MetricState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the last reading of `reading.address` and bump its counter.
    pub fn update(&self, reading: &SensorReading) {
        // Poisoning is ignored: every write is a single insert.
        let mut devices = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let received = devices
            .get(&reading.address)
            .map_or(0, |previous| previous.received);

        devices.insert(
            reading.address,
            DeviceMetrics {
                temperature: reading.temperature,
                humidity: reading.humidity,
                battery: reading.battery,
                received: received + 1,
                last_received: reading.timestamp,
            },
        );
    }

    /// Current metrics of one device.
    pub fn get(&self, address: &MacAddress) -> Option<DeviceMetrics> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .copied()
    }

    /// All devices, ordered by address.
    pub fn snapshot(&self) -> Vec<(MacAddress, DeviceMetrics)> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(address, metrics)| (*address, *metrics))
            .collect()
    }

    /// Count a reading that was dropped before reaching the store.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Count a restart of the scan loop.
    pub fn record_scan_restart(&self) {
        self.scan_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scan_restarts(&self) -> u64 {
        self.scan_restarts.load(Ordering::Relaxed)
    }
}
