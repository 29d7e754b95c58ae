//! Benchmarks for the advertisement pipeline.
//!
//! Covers the work done inside the radio callback (filter, decode, dispatch)
//! and rendering of the `/metrics` page.

use ble_sensor_exporter::exporter::render;
use ble_sensor_exporter::{
    AddressFilter, Advertisement, AdvertisementHandler, Dispatcher, MacAddress, MetricState,
    ServiceData, decode,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::runtime::Runtime;

const RADIO_ADDRESS: &str = "A4:C1:38:0A:01:05";

/// `181a` payload: address, one reserved byte, temperature, humidity, battery
fn sensor_advertisement(address: &str, last_byte: u8) -> Advertisement {
    Advertisement {
        address: address.to_string(),
        service_data: vec![ServiceData {
            uuid: "181a".to_string(),
            data: vec![0xA4, 0xC1, 0x38, 0x0A, 0x01, last_byte, 0x00, 215, 55, 90],
        }],
    }
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let valid = sensor_advertisement(RADIO_ADDRESS, 0x05);
    group.bench_function("valid", |b| b.iter(|| decode(black_box(&valid))));

    let mut wrong_tag = valid.clone();
    wrong_tag.service_data[0].uuid = "fe95".to_string();
    group.bench_function("wrong_tag", |b| b.iter(|| decode(black_box(&wrong_tag))));

    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");
    group.throughput(Throughput::Elements(1));

    for size in [1, 10, 100] {
        let spec = (0..size)
            .map(|i: u8| format!("A4:C1:38:0A:02:{i:02X}"))
            .collect::<Vec<_>>()
            .join(",");
        let filter = AddressFilter::from_spec(&spec).unwrap();

        group.bench_with_input(BenchmarkId::new("miss", size), &filter, |b, filter| {
            b.iter(|| filter.matches(black_box("a4-c1-38-0a-01-05")))
        });
    }

    group.finish();
}

/// Filter, decode and queue from inside a running runtime, as the radio
/// callback does.
fn bench_handler(c: &mut Criterion) {
    let mut group = c.benchmark_group("handler");
    let rt = Runtime::new().unwrap();

    let advertisements: Vec<Advertisement> = (0..100u8)
        .map(|i| sensor_advertisement(RADIO_ADDRESS, i))
        .collect();

    group.throughput(Throughput::Elements(advertisements.len() as u64));
    group.bench_function("100_devices", |b| {
        b.iter(|| {
            rt.block_on(async {
                let state = Arc::new(MetricState::new());
                let (dispatcher, workers) =
                    Dispatcher::spawn(Arc::clone(&state), 4, advertisements.len());
                let handler = AdvertisementHandler::new(AddressFilter::allow_all(), dispatcher);

                for advertisement in &advertisements {
                    black_box(handler.handle(advertisement.clone()));
                }

                drop(handler);
                for worker in workers {
                    worker.await.unwrap();
                }
                black_box(state)
            })
        })
    });

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");

    for devices in [1u8, 10, 100] {
        let state = MetricState::new();
        for i in 0..devices {
            let advertisement = sensor_advertisement(RADIO_ADDRESS, i);
            let mut reading = decode(&advertisement).unwrap();
            reading.address = MacAddress([0xA4, 0xC1, 0x38, 0x0A, 0x01, i]);
            reading.timestamp = SystemTime::now();
            state.update(&reading);
        }

        group.throughput(Throughput::Elements(u64::from(devices)));
        group.bench_with_input(BenchmarkId::from_parameter(devices), &state, |b, state| {
            b.iter(|| black_box(render(state)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_filter,
    bench_handler,
    bench_render
);
criterion_main!(benches);
