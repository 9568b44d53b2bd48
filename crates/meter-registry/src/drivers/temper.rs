//! TEMPerX232 USB thermometer/hygrometer on a serial line.
//!
//! Channels are discovered from the first `ReadTemp` answer and keep that
//! order. The mean statistic is a device-local moving average; max and min are
//! never published.

use super::{Driver, DriverContext, DriverFactory};
use crate::sensor::{match_sorted, query_readings, query_version, Reading, Smoother};
use crate::window::scale;
use crate::{Channel, DeviceMetrics, RecordSlot, RegistryError, Result, StatSet};
use async_trait::async_trait;
use meter_transport::{LinkSettings, SerialLink};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const NAME: &str = "temperx232";
pub const DEFAULT_MULTIPLIER: i64 = 100;
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Opens a serial link for a device path.
pub type LinkOpener =
    Arc<dyn Fn(&str, &LinkSettings) -> meter_transport::Result<Box<dyn SerialLink>> + Send + Sync>;

pub struct TemperFactory {
    opener: LinkOpener,
    settings: LinkSettings,
}

impl TemperFactory {
    /// Real serial ports.
    pub fn tty() -> Self {
        Self::with_opener(|path, settings| {
            let link = meter_transport::TtyLink::open(path, settings)?;
            Ok(Box::new(link) as Box<dyn SerialLink>)
        })
    }

    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(&str, &LinkSettings) -> meter_transport::Result<Box<dyn SerialLink>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            opener: Arc::new(opener),
            settings: LinkSettings::default(),
        }
    }
}

#[async_trait]
impl DriverFactory for TemperFactory {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn initialize(&self, ctx: DriverContext) -> Result<Box<dyn Driver>> {
        let device = ctx.params.device().unwrap_or(DEFAULT_DEVICE).to_string();
        let multiplier = ctx.params.multiplier_or(DEFAULT_MULTIPLIER);

        let opener = Arc::clone(&self.opener);
        let settings = self.settings;
        let path = device.clone();
        let (link, version, readings) = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut link = opener(&path, &settings)?;
            let version = query_version(link.as_mut())?;
            let readings = query_readings(link.as_mut())?;
            Ok((link, version, readings))
        })
        .await
        .map_err(|e| RegistryError::Task(e.to_string()))??;

        if readings.is_empty() {
            return Err(RegistryError::NoData(device));
        }

        ctx.record.update(|r| {
            r.set_identity_once(&version);
            r.channels = readings
                .iter()
                .map(|rd| seed_channel(rd, multiplier))
                .collect();
            r.touch();
        });
        ctx.metrics.polls_ok.inc();
        ctx.activate(NAME, Some(device.clone()), multiplier);
        info!(
            device = ctx.index,
            driver = NAME,
            path = %device,
            channels = readings.len(),
            "sensor online"
        );

        Ok(Box::new(Temper {
            link: Some(link),
            keys: readings.iter().map(|r| r.description.clone()).collect(),
            smoothers: readings.iter().map(|r| Smoother::new(r.value)).collect(),
            record: ctx.record,
            metrics: ctx.metrics,
            device: ctx.index,
        }))
    }
}

fn seed_channel(reading: &Reading, multiplier: i64) -> Channel {
    let mut ch = Channel::new(
        &reading.description,
        &reading.description,
        &reading.unit,
        StatSet::LATEST_MEAN,
    );
    ch.set_latest(scale(reading.value, multiplier));
    ch.set_mean(scale(reading.value, multiplier));
    ch
}

pub struct Temper {
    link: Option<Box<dyn SerialLink>>,
    /// Channel keys in record order, sorted.
    keys: Vec<String>,
    smoothers: Vec<Smoother>,
    record: RecordSlot,
    metrics: DeviceMetrics,
    device: usize,
}

#[async_trait]
impl Driver for Temper {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn refresh(&mut self) -> Result<()> {
        let mut link = self.link.take().ok_or(RegistryError::Closed)?;
        let joined = tokio::task::spawn_blocking(move || {
            let readings = query_readings(link.as_mut());
            (link, readings)
        })
        .await;
        let (link, readings) = match joined {
            Ok(done) => done,
            Err(e) => {
                // the link went down with the task; the device cannot be polled again
                self.metrics.polls_failed.inc();
                error!(device = self.device, error = %e, "serial worker lost, device deactivated");
                self.record.update(|r| r.deactivate());
                return Err(RegistryError::Task(e.to_string()));
            }
        };
        self.link = Some(link);

        let readings = match readings {
            Ok(r) => r,
            Err(e) => {
                self.metrics.polls_failed.inc();
                return Err(e);
            }
        };
        self.metrics.polls_ok.inc();

        let keys: Vec<&str> = self.keys.iter().map(String::as_str).collect();
        let pairs = match_sorted(&readings, &keys);
        if pairs.len() < keys.len() {
            debug!(
                device = self.device,
                matched = pairs.len(),
                expected = keys.len(),
                "partial sensor answer"
            );
        }

        let smoothers = &mut self.smoothers;
        self.record.update(|r| {
            let multiplier = r.multiplier;
            for (reading, n) in &pairs {
                let Some(smoother) = smoothers.get_mut(*n) else {
                    continue;
                };
                let published = smoother.publish(reading.value);
                if let Some(ch) = r.channels.get_mut(*n) {
                    ch.set_latest(scale(reading.value, multiplier));
                    ch.set_mean(scale(published, multiplier));
                }
            }
            if !pairs.is_empty() {
                r.touch();
            }
        });
        for (reading, n) in &pairs {
            if let Some(smoother) = smoothers.get_mut(*n) {
                smoother.settle(reading.value);
            }
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            drop(link);
            debug!(device = self.device, "serial link closed");
        } else if self.record.is_active() {
            warn!(device = self.device, "serial link already gone at teardown");
        }
        self.record.update(|r| r.deactivate());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceRecord, DriverParams, MetricsHub};
    use meter_transport::{MockLink, TransportError};

    fn factory(link: MockLink) -> TemperFactory {
        TemperFactory::with_opener(move |_, _| Ok(Box::new(link.clone()) as Box<dyn SerialLink>))
    }

    fn ctx(params: &str) -> DriverContext {
        DriverContext {
            index: 2,
            params: DriverParams::parse(params),
            record: RecordSlot::new(DeviceRecord::new(2, "")),
            metrics: MetricsHub::new().unwrap().dev,
        }
    }

    #[tokio::test]
    async fn test_discovers_channels_and_scales() {
        let link = MockLink::new();
        link.respond("Version", "TEMPerX232_V2.0\r\n");
        link.respond("ReadTemp", "Temp-Outer:5.10 [C]Temp-Inner:22.81 [C],34.20 [%RH]\r\n");
        let c = ctx("device=/dev/ttyUSB3");
        let record = c.record.clone();
        let _drv = factory(link.clone()).initialize(c).await.unwrap();

        let rec = record.snapshot();
        assert!(rec.active);
        assert_eq!(rec.identity, "TEMPerX232_V2.0");
        assert_eq!(rec.address.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(rec.multiplier, 100);
        let keys: Vec<_> = rec.channels.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, ["Humidity-Inner", "Temp-Inner", "Temp-Outer"]);
        let inner = rec.channel("Temp-Inner").unwrap();
        assert_eq!(inner.latest, Some(2281));
        assert_eq!(inner.mean_window, Some(2281));
        assert_eq!(inner.max_window, None);
        assert_eq!(inner.min_window, None);
        assert_eq!(link.sent(), ["Version", "ReadTemp"]);
    }

    #[tokio::test]
    async fn test_refresh_blends_and_skips_unmatched() {
        let link = MockLink::new();
        link.respond("Version", "V1");
        link.respond("ReadTemp", "Temp-1:20.0[C]Temp-3:10.0[C]");
        let c = ctx("");
        let record = c.record.clone();
        let mut drv = factory(link.clone()).initialize(c).await.unwrap();
        assert_eq!(record.snapshot().address.as_deref(), Some(DEFAULT_DEVICE));

        // Temp-3 disappears, Temp-2 shows up
        link.respond("ReadTemp", "Temp-1:40.0[C]Temp-2:99.0[C]");
        drv.refresh().await.unwrap();

        let rec = record.snapshot();
        let t1 = rec.channel("Temp-1").unwrap();
        assert_eq!(t1.latest, Some(4000));
        assert_eq!(t1.mean_window, Some(2100));
        let t3 = rec.channel("Temp-3").unwrap();
        assert_eq!(t3.latest, Some(1000));
        assert_eq!(t3.mean_window, Some(1000));
        assert!(rec.channel("Temp-2").is_none());
    }

    #[tokio::test]
    async fn test_open_failure_and_empty_answer() {
        let busy = TemperFactory::with_opener(|path, _| Err(TransportError::Busy(path.into())));
        let err = busy.initialize(ctx("")).await.err().unwrap();
        assert!(matches!(err, RegistryError::Transport(TransportError::Busy(_))));

        let link = MockLink::new();
        link.respond("Version", "V1");
        let err = factory(link).initialize(ctx("")).await.err().unwrap();
        assert!(matches!(err, RegistryError::NoData(_)));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let link = MockLink::new();
        link.respond("ReadTemp", "Temp-1:20.0[C]");
        let c = ctx("multiplier=10");
        let record = c.record.clone();
        let mut drv = factory(link).initialize(c).await.unwrap();
        assert_eq!(record.snapshot().channel("Temp-1").unwrap().latest, Some(200));

        drv.teardown().await;
        drv.teardown().await;
        assert!(!record.is_active());
        assert!(record.snapshot().channels.is_empty());
        assert!(matches!(drv.refresh().await, Err(RegistryError::Closed)));
    }

    /// Answers the version query, then dies inside the blocking worker.
    struct CrashingLink {
        calls: usize,
    }

    impl SerialLink for CrashingLink {
        fn open(_: &str, _: &LinkSettings) -> meter_transport::Result<Self> {
            Ok(Self { calls: 0 })
        }

        fn send_line(&mut self, _: &str) -> meter_transport::Result<()> {
            self.calls += 1;
            Ok(())
        }

        fn read_response(&mut self) -> meter_transport::Result<String> {
            match self.calls {
                1 => Ok("V1".into()),
                2 => Ok("Temp-1:20.0[C]".into()),
                _ => panic!("serial worker crashed"),
            }
        }
    }

    #[tokio::test]
    async fn test_worker_crash_deactivates_record() {
        let factory = TemperFactory::with_opener(|path, settings| {
            Ok(Box::new(CrashingLink::open(path, settings)?) as Box<dyn SerialLink>)
        });
        let c = ctx("");
        let record = c.record.clone();
        let mut drv = factory.initialize(c).await.unwrap();
        assert!(record.is_active());

        assert!(matches!(drv.refresh().await, Err(RegistryError::Task(_))));
        assert!(!record.is_active());
        assert!(record.snapshot().channels.is_empty());
        assert!(matches!(drv.refresh().await, Err(RegistryError::Closed)));
    }
}
