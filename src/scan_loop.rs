//! Continuous scan loop.
//!
//! The loop has two states. While *scanning* it runs one radio scan window and
//! feeds every advertisement through [`AdvertisementHandler::handle`]. When the
//! scan ends it *restarts*: immediately after a window that elapsed normally,
//! or after a capped exponential backoff when the radio reported an error.
//! There is no terminal state; the loop runs until the process exits.

use crate::backoff::Backoff;
use crate::decoder::{self, Rejection};
use crate::dispatch::Dispatcher;
use crate::filter::AddressFilter;
use crate::metrics::MetricState;
use crate::scanner::{Advertisement, AdvertisementCallback, Radio, ScanError};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// What happened to a single advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// Sender not in the allow-list
    Filtered,
    /// Not a decodable sensor advertisement
    Rejected(Rejection),
    /// Reading queued for the metric store
    Dispatched,
    /// Reading decoded but the dispatch queue was full
    Dropped,
}

/// Per-advertisement processing: filter, decode, dispatch.
///
/// Runs inside the radio callback and never waits.
#[derive(Debug)]
pub struct AdvertisementHandler {
    filter: AddressFilter,
    dispatcher: Dispatcher,
}

impl AdvertisementHandler {
    pub fn new(filter: AddressFilter, dispatcher: Dispatcher) -> Self {
        Self { filter, dispatcher }
    }

    pub fn handle(&self, advertisement: Advertisement) -> Handled {
        if !self.filter.matches(&advertisement.address) {
            debug!("{}: not in address filter", advertisement.address);
            return Handled::Filtered;
        }

        let reading = match decoder::decode(&advertisement) {
            Ok(reading) => reading,
            Err(rejection) => {
                debug!("{rejection}");
                return Handled::Rejected(rejection);
            }
        };

        if self.dispatcher.submit(reading) {
            Handled::Dispatched
        } else {
            Handled::Dropped
        }
    }
}

/// Drives the radio forever.
pub struct ScanLoop {
    radio: Arc<dyn Radio>,
    adapter: u16,
    window: Duration,
    backoff: Backoff,
    handler: Arc<AdvertisementHandler>,
    state: Arc<MetricState>,
}

impl ScanLoop {
    pub fn new(
        radio: Arc<dyn Radio>,
        adapter: u16,
        window: Duration,
        backoff: Backoff,
        handler: Arc<AdvertisementHandler>,
        state: Arc<MetricState>,
    ) -> Self {
        Self {
            radio,
            adapter,
            window,
            backoff,
            handler,
            state,
        }
    }

    /// Scan until the process exits.
    pub async fn run(&mut self) {
        loop {
            let _ = self.scan_once().await;
        }
    }

    /// Run one scan window, then wait out the backoff if it failed.
    ///
    /// Returns the result of the scan itself.
    pub async fn scan_once(&mut self) -> Result<(), ScanError> {
        let handler = Arc::clone(&self.handler);
        let callback: AdvertisementCallback = Arc::new(move |advertisement| {
            handler.handle(advertisement);
        });

        let result = self.radio.scan(self.adapter, self.window, callback).await;

        match &result {
            Ok(()) => {
                self.backoff.reset();
                debug!("scan window on hci{} elapsed, restarting", self.adapter);
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!(
                    "scan on hci{} failed: {e} (attempt {}), restarting in {delay:?}",
                    self.adapter,
                    self.backoff.failures()
                );
                tokio::time::sleep(delay).await;
            }
        }

        self.state.record_scan_restart();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac_address::MacAddress;
    use crate::scanner::ScanFuture;
    use crate::test_utils::{RADIO_ADDRESS, advertisement, sensor_payload};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    const PAYLOAD_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    /// Outcome of one fake scan window.
    enum Window {
        Deliver(Vec<Advertisement>),
        Fail,
    }

    /// Radio replaying scripted scan windows; once the script is exhausted
    /// every window runs its full length without advertisements.
    struct FakeRadio {
        windows: Mutex<VecDeque<Window>>,
    }

    impl FakeRadio {
        fn new(windows: Vec<Window>) -> Arc<Self> {
            Arc::new(Self {
                windows: Mutex::new(windows.into()),
            })
        }
    }

    impl Radio for FakeRadio {
        fn probe(&self, _adapter: u16) -> ScanFuture<'_> {
            Box::pin(async { Ok(()) })
        }

        fn scan(
            &self,
            adapter: u16,
            window: Duration,
            on_advertisement: AdvertisementCallback,
        ) -> ScanFuture<'_> {
            let next = self.windows.lock().unwrap().pop_front();
            Box::pin(async move {
                match next {
                    Some(Window::Deliver(advertisements)) => {
                        for advertisement in advertisements {
                            on_advertisement(advertisement);
                        }
                        Ok(())
                    }
                    Some(Window::Fail) => Err(ScanError::Bluetooth(format!("hci{adapter} down"))),
                    None => {
                        tokio::time::sleep(window).await;
                        Ok(())
                    }
                }
            })
        }
    }

    fn handler_with(
        filter: AddressFilter,
        capacity: usize,
    ) -> (Arc<AdvertisementHandler>, Arc<MetricState>, Vec<JoinHandle<()>>) {
        let state = Arc::new(MetricState::new());
        let (dispatcher, handles) = Dispatcher::spawn(Arc::clone(&state), 2, capacity);
        (
            Arc::new(AdvertisementHandler::new(filter, dispatcher)),
            state,
            handles,
        )
    }

    fn scan_loop(
        radio: Arc<FakeRadio>,
        handler: Arc<AdvertisementHandler>,
        state: Arc<MetricState>,
    ) -> ScanLoop {
        ScanLoop::new(
            radio,
            0,
            Duration::from_secs(30),
            Backoff::new(Duration::from_secs(1), Duration::from_secs(4)),
            handler,
            state,
        )
    }

    async fn drain(handler: Arc<AdvertisementHandler>, handles: Vec<JoinHandle<()>>) {
        drop(handler);
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_handle_filtered_address() {
        let filter = AddressFilter::from_spec("11:22:33:44:55:66").unwrap();
        let (handler, _state, _handles) = handler_with(filter, 4);

        let adv = advertisement("181a", &sensor_payload(PAYLOAD_MAC.0, 200, 55, 90));
        assert_eq!(handler.handle(adv), Handled::Filtered);
    }

    #[tokio::test]
    async fn test_handle_rejected_advertisement() {
        let (handler, _state, _handles) = handler_with(AddressFilter::allow_all(), 4);

        let adv = advertisement("181a", &[0xAA, 0xBB]);
        assert_eq!(
            handler.handle(adv),
            Handled::Rejected(Rejection::PayloadTooShort {
                address: RADIO_ADDRESS.into(),
                len: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_handle_dispatches_matching_advertisement() {
        let filter = AddressFilter::from_spec(&RADIO_ADDRESS.to_lowercase()).unwrap();
        let (handler, state, handles) = handler_with(filter, 4);

        let adv = advertisement("181a", &sensor_payload(PAYLOAD_MAC.0, 200, 55, 90));
        assert_eq!(handler.handle(adv), Handled::Dispatched);

        drain(handler, handles).await;
        let metrics = state.get(&PAYLOAD_MAC).unwrap();
        assert_eq!((metrics.temperature, metrics.humidity, metrics.battery), (200, 55, 90));
        assert_eq!(metrics.received, 1);
    }

    #[tokio::test]
    async fn test_handle_reports_dropped_when_queue_full() {
        let (handler, state, _handles) = handler_with(AddressFilter::allow_all(), 1);

        let adv = advertisement("181a", &sensor_payload(PAYLOAD_MAC.0, 200, 55, 90));
        assert_eq!(handler.handle(adv.clone()), Handled::Dispatched);
        assert_eq!(handler.handle(adv), Handled::Dropped);
        assert_eq!(state.dropped(), 1);
    }

    #[tokio::test]
    async fn test_scan_once_feeds_handler() {
        let other = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let radio = FakeRadio::new(vec![Window::Deliver(vec![
            advertisement("181a", &sensor_payload(PAYLOAD_MAC.0, 200, 55, 90)),
            advertisement("fe95", &sensor_payload(other.0, 1, 2, 3)),
            advertisement("181a", &sensor_payload(PAYLOAD_MAC.0, 201, 54, 90)),
        ])]);
        let (handler, state, handles) = handler_with(AddressFilter::allow_all(), 16);
        let mut scan = scan_loop(radio, Arc::clone(&handler), Arc::clone(&state));

        assert!(scan.scan_once().await.is_ok());
        assert_eq!(state.scan_restarts(), 1);

        drop(scan);
        drain(handler, handles).await;
        assert_eq!(state.get(&PAYLOAD_MAC).unwrap().received, 2);
        assert!(state.get(&other).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_and_success_resets() {
        let radio = FakeRadio::new(vec![
            Window::Fail,
            Window::Fail,
            Window::Deliver(vec![]),
            Window::Fail,
        ]);
        let (handler, state, _handles) = handler_with(AddressFilter::allow_all(), 4);
        let mut scan = scan_loop(radio, handler, Arc::clone(&state));

        let start = tokio::time::Instant::now();
        assert!(scan.scan_once().await.is_err());
        assert_eq!(start.elapsed().as_secs(), 1);
        assert!(scan.scan_once().await.is_err());
        assert_eq!(start.elapsed().as_secs(), 3);

        // A completed window restarts immediately and resets the backoff.
        assert!(scan.scan_once().await.is_ok());
        assert_eq!(start.elapsed().as_secs(), 3);
        assert!(scan.scan_once().await.is_err());
        assert_eq!(start.elapsed().as_secs(), 4);

        assert_eq!(state.scan_restarts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_never_returns() {
        let radio = FakeRadio::new(vec![Window::Fail, Window::Fail, Window::Fail]);
        let (handler, state, _handles) = handler_with(AddressFilter::allow_all(), 4);
        let mut scan = scan_loop(radio, handler, Arc::clone(&state));

        let finished = tokio::time::timeout(Duration::from_secs(60), scan.run()).await;

        assert!(finished.is_err());
        assert!(state.scan_restarts() > 3);
    }
}
