//! P1 interface bridge: three-phase electricity meter behind a small HTTP
//! gateway. Polls itself on a background task.

use super::{Driver, DriverContext, DriverFactory, HTTP_TIMEOUT};
use crate::json_meter::{JsonChannel, JsonDialect, JsonMeter, JsonPoller, Source};
use crate::{ChannelSpec, RecordSlot, RegistryError, Result, StatSet};
use async_trait::async_trait;
use meter_transport::HttpSource;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const NAME: &str = "p1ib";
pub const DEFAULT_MULTIPLIER: i64 = 1000;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

const DIALECT: JsonDialect = JsonDialect {
    measurements: "d",
    counter: "obis_count",
    identity: &["meter_model"],
    window: 5,
};

const fn obis(
    key: &'static str,
    description: &'static str,
    unit: &'static str,
    stats: StatSet,
) -> JsonChannel {
    JsonChannel {
        spec: ChannelSpec {
            key,
            description,
            unit,
            stats,
        },
        source: Source::Value,
    }
}

/// Registers are cumulative and only publish `latest`.
pub const CHANNELS: &[JsonChannel] = &[
    obis("1-0:1.8.0", "Active energy import, total", "kWh", StatSet::LATEST),
    obis("1-0:2.8.0", "Active energy export, total", "kWh", StatSet::LATEST),
    obis("1-0:3.8.0", "Reactive energy import, total", "kvarh", StatSet::LATEST),
    obis("1-0:4.8.0", "Reactive energy export, total", "kvarh", StatSet::LATEST),
    obis("1-0:1.7.0", "Active power import", "kW", StatSet::ALL),
    obis("1-0:2.7.0", "Active power export", "kW", StatSet::ALL),
    obis("1-0:3.7.0", "Reactive power import", "kvar", StatSet::ALL),
    obis("1-0:4.7.0", "Reactive power export", "kvar", StatSet::ALL),
    obis("1-0:21.7.0", "L1 active power import", "kW", StatSet::ALL),
    obis("1-0:41.7.0", "L2 active power import", "kW", StatSet::ALL),
    obis("1-0:61.7.0", "L3 active power import", "kW", StatSet::ALL),
    obis("1-0:22.7.0", "L1 active power export", "kW", StatSet::ALL),
    obis("1-0:42.7.0", "L2 active power export", "kW", StatSet::ALL),
    obis("1-0:62.7.0", "L3 active power export", "kW", StatSet::ALL),
    obis("1-0:32.7.0", "L1 voltage", "V", StatSet::ALL),
    obis("1-0:52.7.0", "L2 voltage", "V", StatSet::ALL),
    obis("1-0:72.7.0", "L3 voltage", "V", StatSet::ALL),
    obis("1-0:31.7.0", "L1 current", "A", StatSet::ALL),
    obis("1-0:51.7.0", "L2 current", "A", StatSet::ALL),
    obis("1-0:71.7.0", "L3 current", "A", StatSet::ALL),
];

pub struct P1ibFactory;

#[async_trait]
impl DriverFactory for P1ibFactory {
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
        let interval = ctx.params.interval_or(DEFAULT_INTERVAL);
        ctx.record.update(|r| r.multiplier = multiplier);

        let source = HttpSource::meter_data(&address, HTTP_TIMEOUT)?;
        let meter = JsonMeter::new(DIALECT, CHANNELS, ctx.record.clone());
        let mut poller = JsonPoller::new(source, meter, ctx.metrics.clone());
        if poller.poll().await?.is_empty() {
            return Err(RegistryError::NoData(address));
        }

        ctx.activate(NAME, Some(address.clone()), multiplier);
        info!(device = ctx.index, driver = NAME, %address, ?interval, "meter online");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(poller, interval, cancel.clone(), ctx.index));
        Ok(Box::new(P1ib {
            record: ctx.record,
            cancel,
            task: Some(task),
        }))
    }
}

pub struct P1ib {
    record: RecordSlot,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Driver for P1ib {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn teardown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "p1ib poll task ended abnormally");
            }
        }
        self.record.update(|r| r.deactivate());
    }
}

async fn poll_loop(
    mut poller: JsonPoller,
    interval: Duration,
    cancel: CancellationToken,
    device: usize,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match poller.poll().await {
            Ok(outcomes) => debug!(device, payloads = outcomes.len(), "p1ib poll"),
            Err(e) => warn!(device, error = %e, "p1ib poll failed"),
        }
    }
    debug!(device, "p1ib poll task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_meter_data;
    use crate::{DeviceRecord, DriverParams, MetricsHub};

    fn ctx(params: &str) -> DriverContext {
        DriverContext {
            index: 1,
            params: DriverParams::parse(params),
            record: RecordSlot::new(DeviceRecord::new(1, "")),
            metrics: MetricsHub::new().unwrap().dev,
        }
    }

    const BODY: &str = r#"{"info":{"meter_model":"KFM5KAIFA","mac":"aa:bb:cc:00:11:22","rssi":-58,"obis_count":12},"d":{"1-0:1.8.0":12345.678,"1-0:1.7.0":1.234,"1-0:32.7.0":[230.1,230.2,230.3,230.4,230.5]}}"#;

    #[test]
    fn test_twenty_distinct_channels() {
        assert_eq!(CHANNELS.len(), 20);
        let mut keys: Vec<_> = CHANNELS.iter().map(|c| c.spec.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 20);
    }

    #[tokio::test]
    async fn test_initialize_polls_and_scales() {
        let addr = serve_meter_data(BODY).await;
        let c = ctx(&format!("ip={addr},interval=0.05"));
        let record = c.record.clone();
        let mut drv = P1ibFactory.initialize(c).await.unwrap();

        let rec = record.snapshot();
        assert!(rec.active);
        assert_eq!(rec.driver, NAME);
        assert_eq!(rec.multiplier, 1000);
        assert_eq!(rec.identity, "KFM5KAIFA");
        assert_eq!(rec.signal_quality, Some(-58));
        assert_eq!(rec.channels.len(), 20);
        assert_eq!(rec.channel("1-0:1.7.0").unwrap().latest, Some(1234));
        let energy = rec.channel("1-0:1.8.0").unwrap();
        assert_eq!(energy.latest, Some(12_345_678));
        assert_eq!(energy.mean_window, None);
        let volts = rec.channel("1-0:32.7.0").unwrap();
        assert_eq!(volts.mean_window, Some(230_300));
        assert_eq!(volts.max_window, Some(230_500));

        // background task keeps polling
        tokio::time::sleep(Duration::from_millis(200)).await;
        drv.refresh().await.unwrap();
        assert!(record.is_active());

        drv.teardown().await;
        drv.teardown().await;
        let rec = record.snapshot();
        assert!(!rec.active);
        assert!(rec.channels.is_empty());
    }

    #[tokio::test]
    async fn test_missing_ip_is_rejected() {
        let err = P1ibFactory.initialize(ctx("multiplier=10")).await.err().unwrap();
        assert!(matches!(err, RegistryError::MissingParameter("ip")));
    }

    #[tokio::test]
    async fn test_body_without_frame_is_no_data() {
        let addr = serve_meter_data("not json at all").await;
        let err = P1ibFactory
            .initialize(ctx(&format!("ip={addr}")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::NoData(_)));
    }
}
