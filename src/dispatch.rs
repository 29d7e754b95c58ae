//! Bounded hand-off of decoded readings to the metric store.
//!
//! The scan callback only ever calls [`Dispatcher::submit`], which never
//! waits: readings go into a bounded queue drained by a fixed number of worker
//! tasks. When the queue is full the reading is dropped and counted.
//!
//! Workers run concurrently, so two readings for the same device may be
//! applied in a different order than they were submitted. Only the latest
//! value is exported, so this is accepted.

use crate::metrics::MetricState;
use crate::reading::SensorReading;
use log::{info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::format_description;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Default number of worker tasks.
pub const DEFAULT_WORKERS: usize = 4;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Sending side of the worker pool.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<SensorReading>,
    state: Arc<MetricState>,
}

impl Dispatcher {
    /// Start `workers` tasks applying readings to `state` from a queue of
    /// `capacity` readings.
    ///
    /// Workers stop once every `Dispatcher` clone has been dropped and the
    /// queue is drained.
    pub fn spawn(
        state: Arc<MetricState>,
        workers: usize,
        capacity: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|_| {
                let rx = Arc::clone(&rx);
                let state = Arc::clone(&state);
                tokio::spawn(async move { work(rx, state).await })
            })
            .collect();

        (Self { tx, state }, handles)
    }

    /// Queue a reading without waiting.
    ///
    /// Returns `false` if the reading was dropped because the queue is full or
    /// the workers are gone.
    pub fn submit(&self, reading: SensorReading) -> bool {
        match self.tx.try_send(reading) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(reading)) => {
                self.state.record_dropped();
                warn!("dispatch queue full, dropping reading from {}", reading.address);
                false
            }
            Err(mpsc::error::TrySendError::Closed(reading)) => {
                self.state.record_dropped();
                warn!("dispatch workers stopped, dropping reading from {}", reading.address);
                false
            }
        }
    }
}

async fn work(rx: Arc<Mutex<mpsc::Receiver<SensorReading>>>, state: Arc<MetricState>) {
    loop {
        // The lock is only held while waiting, never while applying.
        let next = rx.lock().await.recv().await;
        let Some(reading) = next else {
            break;
        };

        state.update(&reading);
        info!("{}", describe(&reading));
    }
}

/// Log line for an accepted reading.
fn describe(reading: &SensorReading) -> String {
    let time = OffsetDateTime::from(reading.timestamp)
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default();

    format!(
        "{} - Time: {} - Temp: {:.1}c - Humidity: {}% - Battery: {}%",
        reading.address,
        time,
        reading.temperature_celsius(),
        reading.humidity,
        reading.battery
    )
}
