//! Radio abstraction for BLE advertisement scanning.
//!
//! A [`Radio`] runs one scan window at a time and hands every advertisement it
//! sees to a callback. Two Linux backends are available as cargo features:
//! BlueZ over D-Bus (`bluer`) and raw HCI sockets (`hci`).

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use log::{debug, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A service-data element of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceData {
    /// Short UUID tag, e.g. `181a`
    pub uuid: String,
    pub data: Vec<u8>,
}

/// One received advertisement, as reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Sender address in colon-separated hex form
    pub address: String,
    pub service_data: Vec<ServiceData>,
}

/// Callback invoked by a [`Radio`] for each advertisement. Must not block.
pub type AdvertisementCallback = Arc<dyn Fn(Advertisement) + Send + Sync>;

/// Future returned by [`Radio`] operations.
pub type ScanFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + 'a>>;

/// Error type for radio operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The radio ended the scan before the window elapsed
    #[error("scan stopped by adapter hci{0}")]
    Stopped(u16),
    /// None of the candidate adapters could be used
    #[error("no usable Bluetooth adapter (tried {0:?})")]
    NoAdapter(Vec<u16>),
}

/// Scanning primitive of a Bluetooth controller.
pub trait Radio: Send + Sync {
    /// Check that adapter `adapter` (`hci<N>`) exists and can be powered.
    fn probe(&self, adapter: u16) -> ScanFuture<'_>;

    /// Scan on `adapter` for `window`, calling `on_advertisement` for every
    /// advertisement received.
    ///
    /// Returns `Ok(())` once the window has elapsed. Any other termination
    /// is reported as an error.
    fn scan(
        &self,
        adapter: u16,
        window: Duration,
        on_advertisement: AdvertisementCallback,
    ) -> ScanFuture<'_>;
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    #[value(alias = "bluez")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    #[value(alias = "raw")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

/// Open the radio for `backend`.
///
/// # Errors
/// Returns `ScanError::Bluetooth` when the backend cannot be initialized
/// (e.g. bluetoothd is not running).
pub async fn open(backend: Backend) -> Result<Arc<dyn Radio>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Ok(Arc::new(bluer::BluerRadio::new().await?)),
        #[cfg(feature = "hci")]
        Backend::Hci => Ok(Arc::new(hci::HciRadio)),
    }
}

/// Pick the first adapter in `candidates` that the radio can use.
///
/// # Errors
/// Returns [`ScanError::NoAdapter`] when every probe fails.
pub async fn select_adapter(radio: &dyn Radio, candidates: &[u16]) -> Result<u16, ScanError> {
    for &adapter in candidates {
        match radio.probe(adapter).await {
            Ok(()) => {
                debug!("using adapter hci{adapter}");
                return Ok(adapter);
            }
            Err(e) => warn!("adapter hci{adapter} unavailable: {e}"),
        }
    }
    Err(ScanError::NoAdapter(candidates.to_vec()))
}

/// Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Mask selecting the 16-bit short UUID inside a 128-bit UUID.
const SHORT_UUID_MASK: u128 = 0x0000_ffff_0000_0000_0000_0000_0000_0000;

/// Render a 16-bit service UUID as a tag, e.g. `0x181a` as `181a`.
pub fn short_uuid_tag(uuid: u16) -> String {
    format!("{uuid:04x}")
}

/// Render a 128-bit service UUID as a tag.
///
/// UUIDs derived from the Bluetooth base UUID are shortened to their 16-bit
/// form; anything else is rendered in full hyphenated form.
pub fn uuid_tag(uuid: u128) -> String {
    if uuid & !SHORT_UUID_MASK == BLUETOOTH_BASE_UUID {
        short_uuid_tag(((uuid & SHORT_UUID_MASK) >> 96) as u16)
    } else {
        let hex = format!("{uuid:032x}");
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}
