//! `ble-sensor-exporter` library.
//!
//! The binary (`src/main.rs`) is responsible for logger setup and process exit
//! codes. The pipeline from radio to Prometheus lives in the modules below and
//! is wired together in [`crate::app`], where it can be tested with an injected
//! radio.
//!
//! Advertisement flow: [`scanner::Radio`] → [`scan_loop::AdvertisementHandler`]
//! ([`filter::AddressFilter`], [`decoder::decode`]) → [`dispatch::Dispatcher`]
//! → [`metrics::MetricState`] → [`exporter`].

pub mod app;
pub mod backoff;
pub mod decoder;
pub mod dispatch;
pub mod exporter;
pub mod filter;
pub mod mac_address;
pub mod metrics;
pub mod reading;
pub mod scan_loop;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use app::{Options, RunError};
pub use backoff::{Backoff, parse_duration};
pub use decoder::{Rejection, SENSOR_SERVICE_TAG, decode};
pub use dispatch::Dispatcher;
pub use filter::{AddressFilter, FilterError};
pub use mac_address::MacAddress;
pub use metrics::{DeviceMetrics, MetricState};
pub use reading::SensorReading;
pub use scan_loop::{AdvertisementHandler, Handled, ScanLoop};
pub use scanner::{Advertisement, Backend, Radio, ScanError, ServiceData};
