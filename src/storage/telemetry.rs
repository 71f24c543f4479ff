//! History store telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct StatInstruments {
    snapshots_appended: Counter<u64>,
    snapshots_merged: Counter<u64>,
    snapshots_evicted: Counter<u64>,
    persistence_failures: Counter<u64>,
    snapshots_loaded: Counter<u64>,
}

fn instruments() -> &'static StatInstruments {
    static INSTRUMENTS: OnceLock<StatInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("keyvisual.stat");
        StatInstruments {
            snapshots_appended: meter
                .u64_counter("keyvisual.stat.snapshots.appended")
                .with_description("Snapshots appended to the finest layer")
                .init(),
            snapshots_merged: meter
                .u64_counter("keyvisual.stat.snapshots.merged")
                .with_description("Snapshots summed into a coarser layer, by source layer")
                .init(),
            snapshots_evicted: meter
                .u64_counter("keyvisual.stat.snapshots.evicted")
                .with_description("Snapshots dropped from the terminal layer")
                .init(),
            persistence_failures: meter
                .u64_counter("keyvisual.stat.persistence.failures")
                .with_description("Store operations that failed after retries, by operation")
                .init(),
            snapshots_loaded: meter
                .u64_counter("keyvisual.stat.snapshots.loaded")
                .with_description("Snapshots restored from the store at startup")
                .init(),
        }
    })
}

pub fn record_appended() {
    instruments().snapshots_appended.add(1, &[]);
}

pub fn record_merged(from_layer: u8, snapshots: usize) {
    instruments()
        .snapshots_merged
        .add(snapshots as u64, &[KeyValue::new("layer", from_layer as i64)]);
}

pub fn record_evicted() {
    instruments().snapshots_evicted.add(1, &[]);
}

pub fn record_persistence_failure(operation: &'static str) {
    instruments()
        .persistence_failures
        .add(1, &[KeyValue::new("operation", operation)]);
}

pub fn record_loaded(snapshots: usize) {
    instruments().snapshots_loaded.add(snapshots as u64, &[]);
}
