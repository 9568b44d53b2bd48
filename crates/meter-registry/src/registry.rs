use crate::drivers::{
    Driver, DriverContext, DriverFactory, MockFactory, P1ibFactory, TemperFactory, WimbibFactory,
};
use crate::{DeviceMetrics, DeviceRecord, DeviceTable, DriverParams, MeterEntry, MeterTable};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name → factory lookup. Names are matched case-insensitively.
#[derive(Clone, Default)]
pub struct DriverCatalog {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
}

impl DriverCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every driver shipped with this crate, serial ones on real ports.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(P1ibFactory);
        catalog.register(WimbibFactory);
        catalog.register(TemperFactory::tty());
        catalog.register(MockFactory);
        catalog
    }

    /// Adds `factory`, replacing any factory registered under the same name.
    pub fn register(&mut self, factory: impl DriverFactory + 'static) {
        self.factories
            .insert(factory.name().to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DriverFactory>> {
        self.factories.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Owns the record table and one driver per configured device.
pub struct DeviceRegistry {
    table: DeviceTable,
    /// `drivers[i]` writes table position `i + 1`; `None` when skipped,
    /// failed or torn down.
    drivers: Vec<Option<Box<dyn Driver>>>,
    metrics: DeviceMetrics,
}

impl DeviceRegistry {
    /// Initialize every entry in order. Unknown drivers and failed
    /// initializations leave an inactive record and do not affect the others.
    pub async fn start(
        entries: &[MeterEntry],
        catalog: &DriverCatalog,
        metrics: DeviceMetrics,
    ) -> Self {
        let table = DeviceTable::with_len(entries.len());
        let mut drivers: Vec<Option<Box<dyn Driver>>> = Vec::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            let index = i + 1;
            let Some(slot) = table.slot(index) else {
                drivers.push(None);
                continue;
            };
            let Some(factory) = catalog.get(&entry.driver) else {
                warn!(device = index, driver = %entry.driver, "unknown driver, skipping");
                drivers.push(None);
                continue;
            };
            let ctx = DriverContext {
                index,
                params: DriverParams::parse(&entry.parameters),
                record: slot.clone(),
                metrics: metrics.clone(),
            };
            match factory.initialize(ctx).await {
                Ok(driver) => {
                    debug!(device = index, driver = driver.name(), "driver started");
                    drivers.push(Some(driver));
                }
                Err(e) => {
                    error!(device = index, driver = %entry.driver, error = %e, "initialization failed");
                    slot.reset(&entry.driver);
                    drivers.push(None);
                }
            }
        }

        let registry = Self {
            table,
            drivers,
            metrics,
        };
        registry.publish_active();
        info!(
            configured = entries.len(),
            active = registry.active_count(),
            "device registry started"
        );
        registry
    }

    /// Read handle for the façade; clones share the same records.
    pub fn table(&self) -> DeviceTable {
        self.table.clone()
    }

    pub fn active_count(&self) -> usize {
        self.table.active_records().len()
    }

    /// One poll cycle over all registry-driven devices, in table order.
    /// Returns the number of devices whose refresh failed.
    pub async fn refresh_all(&mut self) -> usize {
        let mut failed = 0;
        for (i, slot) in self.drivers.iter_mut().enumerate() {
            let Some(driver) = slot else {
                continue;
            };
            if let Err(e) = driver.refresh().await {
                failed += 1;
                warn!(device = i + 1, driver = driver.name(), error = %e, "refresh failed");
            }
        }
        failed
    }

    /// Refresh every `interval` until `cancel` fires. Ticks missed while a
    /// cycle overruns are skipped, never bunched up.
    pub async fn run(&mut self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // initialization already fetched once
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let failed = self.refresh_all().await;
                    if failed > 0 {
                        debug!(failed, "poll cycle finished with failures");
                    }
                }
            }
        }
    }

    /// Tear down every driver in table order. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        for (i, slot) in self.drivers.iter_mut().enumerate() {
            if let Some(mut driver) = slot.take() {
                driver.teardown().await;
                info!(device = i + 1, driver = driver.name(), "driver stopped");
            }
        }
        self.publish_active();
    }

    fn publish_active(&self) {
        self.metrics
            .devices_active
            .set(i64::try_from(self.active_count()).unwrap_or(i64::MAX));
    }
}

impl MeterTable for DeviceRegistry {
    fn record_count(&self) -> usize {
        self.table.record_count()
    }

    fn record(&self, index: usize) -> Option<DeviceRecord> {
        self.table.record(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_meter_data;
    use crate::MetricsHub;
    use meter_transport::{MockLink, SerialLink};

    fn entry(driver: &str, parameters: &str) -> MeterEntry {
        MeterEntry {
            driver: driver.to_string(),
            parameters: parameters.to_string(),
        }
    }

    fn catalog_with(link: &MockLink) -> DriverCatalog {
        let mut catalog = DriverCatalog::builtin();
        let link = link.clone();
        catalog.register(TemperFactory::with_opener(move |_, _| {
            Ok(Box::new(link.clone()) as Box<dyn SerialLink>)
        }));
        catalog
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = DriverCatalog::builtin();
        assert_eq!(catalog.names(), ["mock", "p1ib", "temperx232", "wimbib"]);
        assert!(catalog.get("P1IB").is_some());
        assert!(catalog.get("kamstrup").is_none());
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let addr = serve_meter_data(
            r#"{"info":{"meter_model":"AM550","obis_count":3},"d":{"1-0:1.7.0":1.234}}"#,
        )
        .await;
        let link = MockLink::new();
        link.respond("Version", "TEMPerX232");
        link.respond("ReadTemp", "Temp-1:20.0[C]");

        let hub = MetricsHub::new().unwrap();
        let entries = [
            entry("p1ib", &format!("ip={addr},multiplier=1000,interval=0.1")),
            entry("temperx232", "device=/dev/ttyUSB0"),
            entry("no-such-driver", ""),
            entry("mock", "fail=1"),
            entry("MOCK", "value=5"),
        ];
        let mut reg = DeviceRegistry::start(&entries, &catalog_with(&link), hub.dev.clone()).await;

        assert_eq!(reg.record_count(), 5);
        assert_eq!(reg.active_count(), 3);
        assert_eq!(hub.dev.devices_active.get(), 3);

        let p1 = reg.record(1).unwrap();
        assert_eq!(p1.identity, "AM550");
        assert_eq!(p1.channel("1-0:1.7.0").unwrap().latest, Some(1234));
        let temper = reg.record(2).unwrap();
        assert_eq!(temper.channel("Temp-1").unwrap().latest, Some(2000));
        assert!(reg.record(3).is_none());
        assert!(reg.record(4).is_none());
        assert_eq!(reg.table().slot(4).unwrap().snapshot().driver, "mock");
        assert_eq!(reg.record(5).unwrap().channel("counter").unwrap().latest, Some(6));
        assert!(reg.record(0).is_none());
        assert!(reg.record(6).is_none());

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            stopper.cancel();
        });
        reg.run(Duration::from_millis(20), cancel).await;
        let reads = link.sent().iter().filter(|c| *c == "ReadTemp").count();
        assert!(reads > 2);
        assert!(reg.record(5).unwrap().channel("counter").unwrap().latest > Some(6));

        let facade = reg.table();
        reg.shutdown().await;
        reg.shutdown().await;
        assert_eq!(reg.active_count(), 0);
        assert_eq!(hub.dev.devices_active.get(), 0);
        assert!(facade.record(1).is_none());
        assert!(facade.slot(2).unwrap().snapshot().channels.is_empty());
    }
}
