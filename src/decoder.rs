//! Decoder for the `181a` environmental sensing service-data layout.
//!
//! The payload has a fixed layout:
//!
//! | Bytes | Content                                  |
//! |-------|------------------------------------------|
//! | 0..6  | Device address, most significant first   |
//! | 7     | Temperature, tenths of a degree Celsius  |
//! | 8     | Humidity, percent                        |
//! | 9     | Battery, percent                         |
//!
//! Anything else (other record counts, other tags, short payloads) is rejected.
//! Rejections are expected traffic, not failures; callers log them at debug
//! level and move on.

use crate::mac_address::MacAddress;
use crate::reading::SensorReading;
use crate::scanner::Advertisement;
use std::time::SystemTime;
use thiserror::Error;

/// Service-data tag of the supported payload.
pub const SENSOR_SERVICE_TAG: &str = "181a";

/// Smallest payload that contains every field of the layout.
pub const MIN_PAYLOAD_LEN: usize = 10;

const ADDRESS_RANGE: std::ops::Range<usize> = 0..6;
const TEMPERATURE_OFFSET: usize = 7;
const HUMIDITY_OFFSET: usize = 8;
const BATTERY_OFFSET: usize = 9;

/// Why an advertisement did not produce a reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("{address}: expected one service data record, got {count}")]
    ServiceDataCount { address: String, count: usize },
    #[error("{address}: unexpected service data tag {tag}")]
    UnexpectedTag { address: String, tag: String },
    #[error("{address}: payload too short ({len} < 10 bytes)")]
    PayloadTooShort { address: String, len: usize },
}

/// Decode an advertisement, timestamping the reading with the current time.
pub fn decode(advertisement: &Advertisement) -> Result<SensorReading, Rejection> {
    decode_at(advertisement, SystemTime::now())
}

/// Decode an advertisement, timestamping the reading with `timestamp`.
pub fn decode_at(
    advertisement: &Advertisement,
    timestamp: SystemTime,
) -> Result<SensorReading, Rejection> {
    let record = match advertisement.service_data.as_slice() {
        [record] => record,
        records => {
            return Err(Rejection::ServiceDataCount {
                address: advertisement.address.clone(),
                count: records.len(),
            });
        }
    };

    if record.uuid != SENSOR_SERVICE_TAG {
        return Err(Rejection::UnexpectedTag {
            address: advertisement.address.clone(),
            tag: record.uuid.clone(),
        });
    }

    let data = record.data.as_slice();
    if data.len() < MIN_PAYLOAD_LEN {
        return Err(Rejection::PayloadTooShort {
            address: advertisement.address.clone(),
            len: data.len(),
        });
    }

    let mut address = [0u8; 6];
    address.copy_from_slice(&data[ADDRESS_RANGE]);

    Ok(SensorReading {
        address: MacAddress(address),
        temperature: data[TEMPERATURE_OFFSET],
        humidity: data[HUMIDITY_OFFSET],
        battery: data[BATTERY_OFFSET],
        timestamp,
    })
}
