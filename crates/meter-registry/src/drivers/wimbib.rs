//! Wireless M-Bus water meter bridge. Same HTTP framing as P1, with a `meter`
//! measurement object, alarm flags and a flow rate derived from the volume
//! register.

use super::{Driver, DriverContext, DriverFactory, HTTP_TIMEOUT};
use crate::json_meter::{JsonChannel, JsonDialect, JsonMeter, JsonPoller, Source};
use crate::{ChannelSpec, RecordSlot, RegistryError, Result, StatSet};
use async_trait::async_trait;
use meter_transport::HttpSource;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const NAME: &str = "wimbib";
pub const DEFAULT_MULTIPLIER: i64 = 1000;

/// Volume deltas are only turned into a flow rate over at least this span.
pub const FLOW_MIN_SPAN: Duration = Duration::from_secs(360);

const VOLUME_KEY: &str = "total_volume";
const FLOW_KEY: &str = "8-0:2.0.0";

const DIALECT: JsonDialect = JsonDialect {
    measurements: "meter",
    counter: "crc_ok_cnt",
    identity: &["meter_model", "meter_id"],
    window: 6,
};

pub const CHANNELS: &[JsonChannel] = &[
    JsonChannel {
        spec: ChannelSpec {
            key: VOLUME_KEY,
            description: "Volume (V), accumulated, total, current value",
            unit: "L",
            stats: StatSet::LATEST,
        },
        source: Source::Value,
    },
    JsonChannel {
        spec: ChannelSpec {
            key: "target_volume",
            description: "Volume (V), accumulated, total, set date value",
            unit: "L",
            stats: StatSet::LATEST,
        },
        source: Source::Value,
    },
    JsonChannel {
        spec: ChannelSpec {
            key: FLOW_KEY,
            description: "Flow rate, average (Va/t), current value",
            unit: "L/h",
            stats: StatSet::MEAN,
        },
        source: Source::Derived,
    },
    JsonChannel {
        spec: ChannelSpec {
            key: "time_weighted_meter_temp_day",
            description: "Day average meter temperature",
            unit: "C",
            stats: StatSet::MEAN,
        },
        source: Source::Value,
    },
    JsonChannel {
        spec: ChannelSpec {
            key: "min_water_temp_day",
            description: "Day minimum water temperature",
            unit: "C",
            stats: StatSet::MIN,
        },
        source: Source::Value,
    },
    JsonChannel {
        spec: ChannelSpec {
            key: "leak-alarm burst-alarm",
            description: "0=OK, 1=leak alarm, 2=burst alarm, 3=leak+burst",
            unit: "-",
            stats: StatSet::LATEST,
        },
        source: Source::Flags(&["leak-alarm", "burst-alarm"]),
    },
    JsonChannel {
        spec: ChannelSpec {
            key: "dry-alarm reverse-alarm",
            description: "0=OK, 1=dry alarm, 2=reverse alarm, 3=dry+reverse",
            unit: "-",
            stats: StatSet::LATEST,
        },
        source: Source::Flags(&["dry-alarm", "reverse-alarm"]),
    },
];

/// Average flow from two volume readings at least [`FLOW_MIN_SPAN`] apart.
#[derive(Debug, Default)]
pub struct FlowEstimator {
    previous: Option<(i64, Instant)>,
}

impl FlowEstimator {
    /// `volume` is the scaled register value; the result is per hour in the
    /// same scale.
    pub fn observe(&mut self, volume: i64, now: Instant) -> Option<i64> {
        let Some((v0, t0)) = self.previous else {
            self.previous = Some((volume, now));
            return None;
        };
        let span = now.saturating_duration_since(t0);
        if span <= FLOW_MIN_SPAN {
            return None;
        }
        self.previous = Some((volume, now));
        Some((volume.saturating_sub(v0) as f64 * 3600.0 / span.as_secs_f64()).round() as i64)
    }
}

pub struct WimbibFactory;

#[async_trait]
impl DriverFactory for WimbibFactory {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn initialize(&self, ctx: DriverContext) -> Result<Box<dyn Driver>> {
        let address = ctx
            .params
            .ip()
            .ok_or(RegistryError::MissingParameter("ip"))?
            .to_string();
        let multiplier = ctx.params.multiplier_or(DEFAULT_MULTIPLIER);
        ctx.record.update(|r| r.multiplier = multiplier);

        let source = HttpSource::meter_data(&address, HTTP_TIMEOUT)?;
        let meter = JsonMeter::new(DIALECT, CHANNELS, ctx.record.clone());
        let mut drv = Wimbib {
            poller: Some(JsonPoller::new(source, meter, ctx.metrics.clone())),
            flow: FlowEstimator::default(),
            record: ctx.record.clone(),
            device: ctx.index,
        };
        if !drv.poll().await? {
            return Err(RegistryError::NoData(address));
        }

        ctx.activate(NAME, Some(address.clone()), multiplier);
        info!(device = ctx.index, driver = NAME, %address, "meter online");
        Ok(Box::new(drv))
    }
}

pub struct Wimbib {
    poller: Option<JsonPoller>,
    flow: FlowEstimator,
    record: RecordSlot,
    device: usize,
}

impl Wimbib {
    /// Returns whether any payload carried a sample counter.
    async fn poll(&mut self) -> Result<bool> {
        let poller = self.poller.as_mut().ok_or(RegistryError::Closed)?;
        let outcomes = poller.poll().await?;
        let accepted = outcomes.iter().any(|o| o.counter.is_some());
        if accepted {
            let flow = &mut self.flow;
            self.record.update(|r| {
                let volume = r.channel(VOLUME_KEY).and_then(|c| c.latest);
                let rate = volume.and_then(|v| flow.observe(v, Instant::now()));
                if let (Some(rate), Some(ch)) = (rate, r.channel_mut(FLOW_KEY)) {
                    ch.set_mean(rate);
                }
            });
        }
        debug!(device = self.device, payloads = outcomes.len(), "wimbib poll");
        Ok(!outcomes.is_empty())
    }
}

#[async_trait]
impl Driver for Wimbib {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn refresh(&mut self) -> Result<()> {
        self.poll().await.map(|_| ())
    }

    async fn teardown(&mut self) {
        if self.poller.take().is_some() {
            debug!(device = self.device, "wimbib released");
        }
        self.record.update(|r| r.deactivate());
    }
}
