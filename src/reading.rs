//! Decoded sensor reading.

use crate::mac_address::MacAddress;
use std::time::SystemTime;

/// A reading decoded from a single `181a` service-data advertisement.
///
/// Values are kept exactly as transmitted:
/// - Temperature in tenths of a degree Celsius
/// - Humidity in percent
/// - Battery level in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    /// Address carried in the payload itself
    pub address: MacAddress,
    /// Raw temperature, tenths of a degree Celsius
    pub temperature: u8,
    /// Relative humidity in percent
    pub humidity: u8,
    /// Battery level in percent
    pub battery: u8,
    /// Wall-clock time the advertisement was decoded
    pub timestamp: SystemTime,
}

impl SensorReading {
    /// Temperature in degrees Celsius, for display.
    pub fn temperature_celsius(&self) -> f64 {
        f64::from(self.temperature) / 10.0
    }
}
