//! JSON-over-HTTP meter protocol shared by the IP bridge drivers.
//!
//! A meter answers `GET /meterData` with one or more JSON objects. Each object
//! has an `info` member (model, MAC, RSSI and a sample counter) and a
//! measurement member keyed by channel key. Dialects differ only in member
//! names and window length.

use crate::window::{scale, WindowAggregator};
use crate::{Channel, ChannelSpec, DeviceMetrics, RecordSlot, Result};
use meter_transport::{FrameEvent, HttpSource, JsonAccumulator};
use serde_json::Value;
use tracing::{debug, trace};

/// Member names and window length of one JSON meter family.
#[derive(Debug, Clone, Copy)]
pub struct JsonDialect {
    /// Member holding the measurements (`"d"`, `"meter"`).
    pub measurements: &'static str,
    /// Member of `info` carrying the sample counter.
    pub counter: &'static str,
    /// Members of `info` concatenated into the record identity.
    pub identity: &'static [&'static str],
    pub window: usize,
}

/// Where a channel gets its value from.
#[derive(Debug, Clone, Copy)]
pub enum Source {
    /// Numeric member named by the channel key; an array carries recent history.
    Value,
    /// Boolean members packed into a bitmask, first member in bit 0.
    Flags(&'static [&'static str]),
    /// Computed by the driver; left untouched here.
    Derived,
}

#[derive(Debug, Clone, Copy)]
pub struct JsonChannel {
    pub spec: ChannelSpec,
    pub source: Source,
}

/// Result of applying one parsed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadOutcome {
    pub counter: Option<i64>,
    pub folded: bool,
}

/// Protocol state of one JSON meter: frame accumulator plus window state.
/// Every driver instance owns its own.
pub struct JsonMeter {
    dialect: JsonDialect,
    channels: Vec<JsonChannel>,
    accumulator: JsonAccumulator,
    window: WindowAggregator,
    record: RecordSlot,
    metrics: Option<DeviceMetrics>,
}

impl JsonMeter {
    /// Declares `channels` on the record; the set is fixed from here on.
    pub fn new(dialect: JsonDialect, channels: &[JsonChannel], record: RecordSlot) -> Self {
        record.update(|r| {
            r.channels = channels.iter().map(|c| Channel::from(&c.spec)).collect();
        });
        Self {
            dialect,
            channels: channels.to_vec(),
            accumulator: JsonAccumulator::new(),
            window: WindowAggregator::new(dialect.window, channels.len()),
            record,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: DeviceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn record(&self) -> &RecordSlot {
        &self.record
    }

    pub fn window(&self) -> &WindowAggregator {
        &self.window
    }

    /// Bytes buffered towards the next frame.
    pub fn buffered(&self) -> usize {
        self.accumulator.position()
    }

    /// Drop any partial frame left over from an interrupted body.
    pub fn reset_frame(&mut self) {
        self.accumulator.reset();
    }

    /// Feed one body chunk; returns an outcome per object completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<PayloadOutcome> {
        match self.accumulator.push(chunk) {
            FrameEvent::Pending => Vec::new(),
            FrameEvent::Complete(objects) => objects.iter().map(|o| self.apply(o)).collect(),
            FrameEvent::Discarded => {
                if let Some(m) = &self.metrics {
                    m.frames_discarded.inc();
                }
                Vec::new()
            }
            FrameEvent::Overflow => {
                if let Some(m) = &self.metrics {
                    m.frame_overflows.inc();
                }
                Vec::new()
            }
        }
    }

    /// Apply one parsed object to the record.
    pub fn apply(&mut self, payload: &Value) -> PayloadOutcome {
        let dialect = self.dialect;
        let info = payload.get("info");
        let counter = info
            .and_then(|i| i.get(dialect.counter))
            .and_then(as_i64);
        let measurements = payload.get(dialect.measurements);

        let samples: Vec<Vec<f64>> = self
            .channels
            .iter()
            .map(|c| match c.source {
                Source::Value => measurements
                    .and_then(|m| m.get(c.spec.key))
                    .map(samples_of)
                    .unwrap_or_default(),
                _ => Vec::new(),
            })
            .collect();

        let channels = &self.channels;
        let window = &mut self.window;
        self.record.update(|r| {
            if let Some(info) = info {
                let identity: String = dialect
                    .identity
                    .iter()
                    .filter_map(|k| info.get(*k))
                    .map(text_of)
                    .collect();
                r.set_identity_once(&identity);
                if let Some(mac) = info.get("mac") {
                    r.set_hardware_address_once(&text_of(mac));
                }
                if let Some(rssi) = info.get("rssi").and_then(as_i64) {
                    r.signal_quality = Some(rssi);
                }
            }

            let Some(counter) = counter else {
                trace!(device = r.index, "payload without sample counter");
                return PayloadOutcome {
                    counter: None,
                    folded: false,
                };
            };

            let multiplier = r.multiplier;
            let slices: Vec<&[f64]> = samples.iter().map(Vec::as_slice).collect();
            let upd = window.update(counter, &slices, multiplier);

            for (((ch, spec), s), w) in r
                .channels
                .iter_mut()
                .zip(channels)
                .zip(&samples)
                .zip(&upd.values)
            {
                match spec.source {
                    Source::Value => {
                        if let Some(v) = s.last() {
                            ch.set_latest(scale(*v, multiplier));
                        }
                    }
                    Source::Flags(keys) => {
                        if let Some(bits) = measurements.and_then(|m| flags(m, keys)) {
                            ch.set_latest(bits);
                        }
                    }
                    Source::Derived => {}
                }
                if let Some(w) = w {
                    ch.set_window(w);
                }
            }
            r.touch();
            if upd.folded {
                debug!(device = r.index, counter, "window folded");
            }
            PayloadOutcome {
                counter: Some(counter),
                folded: upd.folded,
            }
        })
    }
}

/// One HTTP fetch per poll, feeding the body into a [`JsonMeter`].
pub struct JsonPoller {
    source: HttpSource,
    meter: JsonMeter,
    metrics: DeviceMetrics,
}

impl JsonPoller {
    pub fn new(source: HttpSource, meter: JsonMeter, metrics: DeviceMetrics) -> Self {
        Self {
            source,
            meter: meter.with_metrics(metrics.clone()),
            metrics,
        }
    }

    pub fn meter(&self) -> &JsonMeter {
        &self.meter
    }

    pub async fn poll(&mut self) -> Result<Vec<PayloadOutcome>> {
        // each body starts a fresh frame
        self.meter.reset_frame();
        let mut outcomes = Vec::new();
        let meter = &mut self.meter;
        let fetched = self
            .source
            .fetch(|chunk| outcomes.extend(meter.feed(chunk)))
            .await;
        match fetched {
            Ok(bytes) => {
                trace!(url = self.source.url(), bytes, "meter data fetched");
                self.metrics.polls_ok.inc();
                Ok(outcomes)
            }
            Err(e) => {
                self.metrics.polls_failed.inc();
                Err(e.into())
            }
        }
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn samples_of(v: &Value) -> Vec<f64> {
    match v {
        Value::Array(items) => items.iter().filter_map(as_f64).collect(),
        other => as_f64(other).into_iter().collect(),
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}

/// Bitmask of boolean members; `None` unless the first member is present.
fn flags(measurements: &Value, keys: &[&str]) -> Option<i64> {
    let first = measurements.get(*keys.first()?)?;
    let mut bits = i64::from(truthy(first));
    for (bit, key) in keys.iter().enumerate().skip(1) {
        if measurements.get(*key).is_some_and(truthy) {
            bits |= 1 << bit;
        }
    }
    Some(bits)
}
