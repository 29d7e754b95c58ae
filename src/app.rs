//! Core application runner for `ble-sensor-exporter`.
//!
//! This module is decoupled from process exit codes and logger setup so the
//! wiring can be exercised with an injected radio.

use crate::backoff::{Backoff, DEFAULT_INITIAL_BACKOFF, parse_duration};
use crate::dispatch::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, Dispatcher};
use crate::exporter;
use crate::filter::{AddressFilter, FilterError};
use crate::metrics::MetricState;
use crate::scanner::{self, Backend, Radio, ScanError};
use crate::scan_loop::{AdvertisementHandler, ScanLoop};
use clap::Parser;
use log::{error, info};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default length of one scan window.
pub const DEFAULT_SCAN_WINDOW: &str = "30s";

/// Default cap on the restart delay after scan failures.
pub const DEFAULT_MAX_BACKOFF: &str = "60s";

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Only accept advertisements from these addresses.
    /// Either a comma-separated list (AA:BB:CC:DD:EE:FF,11-22-33-44-55-66)
    /// or file:PATH for a file with one address per line.
    #[arg(long, alias = "macFilter", default_value = "", value_name = "SPEC")]
    pub mac_filter: String,

    /// Print debug messages, including rejected advertisements
    #[arg(short = 'd', long, alias = "debugMode")]
    pub debug: bool,

    /// Bluetooth adapter index (hciN)
    #[arg(long, alias = "hciID", default_value_t = 0, value_name = "N")]
    pub adapter: u16,

    /// Adapters to try, in order, when --adapter is unavailable
    #[arg(long, value_delimiter = ',', value_name = "N,...")]
    pub adapter_fallback: Vec<u16>,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Address of the Prometheus metrics listener
    #[arg(long, default_value = exporter::DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Length of one scan window before it is restarted.
    /// Accepts duration with suffix: 30s, 1m, 500ms.
    #[arg(long, default_value = DEFAULT_SCAN_WINDOW, value_parser = parse_duration)]
    pub scan_window: Duration,

    /// Longest wait between restarts after repeated scan failures
    #[arg(long, default_value = DEFAULT_MAX_BACKOFF, value_parser = parse_duration)]
    pub max_backoff: Duration,

    /// Number of workers applying readings to the metric store
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Readings buffered between the scanner and the workers
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl Options {
    /// Adapter indices to try, preferred first, without duplicates.
    pub fn adapter_candidates(&self) -> Vec<u16> {
        let mut candidates = vec![self.adapter];
        for &adapter in &self.adapter_fallback {
            if !candidates.contains(&adapter) {
                candidates.push(adapter);
            }
        }
        candidates
    }
}

/// Errors that prevent the exporter from starting.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("metrics listener: {0}")]
    Io(#[from] io::Error),
}

/// Open the configured backend and run the exporter.
pub async fn run(options: Options) -> Result<(), RunError> {
    let radio = scanner::open(options.backend).await?;
    run_with_radio(options, radio).await
}

/// Run the exporter on an already opened radio.
///
/// Startup failures (filter file, adapter, listener) are returned; once
/// scanning has started this only returns if the metrics server fails.
pub async fn run_with_radio(options: Options, radio: Arc<dyn Radio>) -> Result<(), RunError> {
    let filter = AddressFilter::from_spec(&options.mac_filter)?;
    if filter.accepts_all() {
        info!("accepting advertisements from all addresses");
    } else {
        info!("accepting advertisements from {} address(es)", filter.len());
    }

    let adapter = scanner::select_adapter(radio.as_ref(), &options.adapter_candidates()).await?;

    let state = Arc::new(MetricState::new());

    let listener = exporter::bind(options.listen).await?;
    info!("serving metrics on http://{}/metrics", options.listen);
    let server = tokio::spawn(exporter::serve(listener, Arc::clone(&state)));

    let (dispatcher, _workers) =
        Dispatcher::spawn(Arc::clone(&state), options.workers, options.queue_capacity);
    let handler = Arc::new(AdvertisementHandler::new(filter, dispatcher));

    let mut scan_loop = ScanLoop::new(
        radio,
        adapter,
        options.scan_window,
        Backoff::new(DEFAULT_INITIAL_BACKOFF, options.max_backoff),
        handler,
        state,
    );

    info!(
        "scanning on hci{adapter} with {} backend, window {:?}",
        options.backend, options.scan_window
    );

    tokio::select! {
        _ = scan_loop.run() => Ok(()),
        result = server => match result {
            Ok(result) => Ok(result?),
            Err(join_error) => {
                error!("metrics server task failed: {join_error}");
                Err(RunError::Io(io::Error::other(join_error)))
            }
        },
    }
}
