use crate::mac_address::MacAddress;
use crate::reading::SensorReading;
use crate::scanner::{Advertisement, ServiceData};
use std::time::{Duration, SystemTime};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Radio-level sender address used by [`advertisement`].
pub const RADIO_ADDRESS: &str = "A4:C1:38:0A:01:05";

/// Build a `181a` payload in the fixed layout.
pub fn sensor_payload(address: [u8; 6], temperature: u8, humidity: u8, battery: u8) -> Vec<u8> {
    let mut payload = address.to_vec();
    payload.extend_from_slice(&[0x00, temperature, humidity, battery]);
    payload
}

/// An advertisement from [`RADIO_ADDRESS`] with a single service-data record.
pub fn advertisement(tag: &str, payload: &[u8]) -> Advertisement {
    Advertisement {
        address: RADIO_ADDRESS.to_string(),
        service_data: vec![ServiceData {
            uuid: tag.to_string(),
            data: payload.to_vec(),
        }],
    }
}

/// A reading with a fixed timestamp one second after the epoch.
pub fn reading(address: MacAddress, temperature: u8, humidity: u8, battery: u8) -> SensorReading {
    SensorReading {
        address,
        temperature,
        humidity,
        battery,
        timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(1),
    }
}
