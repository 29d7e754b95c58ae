//! Prometheus metrics endpoint.
//!
//! Serves `GET /metrics` in the Prometheus text exposition format. Metric
//! names are kept stable for existing dashboards:
//!
//! - `temp` - raw temperature, tenths of a degree Celsius
//! - `humidity` - relative humidity percent
//! - `battery` - battery percent
//! - `payloads_received` - readings received per device
//! - `last_payload_received_ts` - Unix time of the last reading
//! - `readings_dropped` - readings dropped because the dispatch queue was full
//! - `scan_restarts` - scan windows completed or failed

use crate::metrics::{DeviceMetrics, MetricState};
use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use std::fmt::Write;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Default address of the metrics listener.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:2112";

/// Content type for Prometheus metrics.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct DeviceMetric {
    name: &'static str,
    help: &'static str,
    kind: &'static str,
    value: fn(&DeviceMetrics) -> u64,
}

const DEVICE_METRICS: [DeviceMetric; 5] = [
    DeviceMetric {
        name: "temp",
        help: "Current temperature",
        kind: "gauge",
        value: |m| u64::from(m.temperature),
    },
    DeviceMetric {
        name: "humidity",
        help: "Current humidity %",
        kind: "gauge",
        value: |m| u64::from(m.humidity),
    },
    DeviceMetric {
        name: "battery",
        help: "Current battery %",
        kind: "gauge",
        value: |m| u64::from(m.battery),
    },
    DeviceMetric {
        name: "payloads_received",
        help: "Count of payloads received by this mac",
        kind: "counter",
        value: |m| m.received,
    },
    DeviceMetric {
        name: "last_payload_received_ts",
        help: "Payload last received timestamp in unix",
        kind: "gauge",
        value: DeviceMetrics::last_received_unix,
    },
];

/// Render the metric state in Prometheus text format.
pub fn render(state: &MetricState) -> String {
    let devices = state.snapshot();
    let mut output = String::with_capacity(256 + devices.len() * 256);

    // Writing to a String cannot fail.
    if !devices.is_empty() {
        for metric in &DEVICE_METRICS {
            let _ = writeln!(output, "# HELP {} {}", metric.name, metric.help);
            let _ = writeln!(output, "# TYPE {} {}", metric.name, metric.kind);
            for (address, metrics) in &devices {
                let _ = writeln!(
                    output,
                    "{}{{mac=\"{}\"}} {}",
                    metric.name,
                    address,
                    (metric.value)(metrics)
                );
            }
        }
    }

    let _ = writeln!(output, "# HELP readings_dropped Readings dropped because the dispatch queue was full");
    let _ = writeln!(output, "# TYPE readings_dropped counter");
    let _ = writeln!(output, "readings_dropped {}", state.dropped());

    let _ = writeln!(output, "# HELP scan_restarts Scan windows completed or failed");
    let _ = writeln!(output, "# TYPE scan_restarts counter");
    let _ = writeln!(output, "scan_restarts {}", state.scan_restarts());

    output
}

async fn metrics(State(state): State<Arc<MetricState>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], render(&state))
}

/// Router exposing `GET /metrics`.
pub fn router(state: Arc<MetricState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Bind the metrics listener.
///
/// Kept separate from [`serve`] so a bind failure surfaces at startup.
pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Serve the metrics endpoint until the process exits.
pub async fn serve(listener: TcpListener, state: Arc<MetricState>) -> io::Result<()> {
    axum::serve(listener, router(state)).await
}
