//! Label mapping telemetry.

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct LabelInstruments {
    refresh_outcomes: Counter<u64>,
}

fn instruments() -> &'static LabelInstruments {
    static INSTRUMENTS: OnceLock<LabelInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("keyvisual.labels");
        LabelInstruments {
            refresh_outcomes: meter
                .u64_counter("keyvisual.labels.refresh.outcomes")
                .with_description("Label mapping refreshes by outcome")
                .init(),
        }
    })
}

/// `outcome` is one of `updated`, `unchanged`, `partial` or `failed`.
pub fn record_refresh_outcome(outcome: &'static str) {
    instruments()
        .refresh_outcomes
        .add(1, &[KeyValue::new("outcome", outcome)]);
}
