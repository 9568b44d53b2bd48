//! Synthetic device for running the registry without hardware.
//!
//! Publishes one `counter` channel whose raw value is `value=` plus the number
//! of refreshes so far. `fail=1` makes initialization fail.

use super::{Driver, DriverContext, DriverFactory};
use crate::window::{scale, WindowAggregator};
use crate::{Channel, RecordSlot, RegistryError, Result, StatSet};
use async_trait::async_trait;
use tracing::info;

pub const NAME: &str = "mock";
pub const DEFAULT_MULTIPLIER: i64 = 1;
const WINDOW: usize = 5;

pub struct MockFactory;

#[async_trait]
impl DriverFactory for MockFactory {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn initialize(&self, ctx: DriverContext) -> Result<Box<dyn Driver>> {
        if ctx.params.get("fail").is_some_and(|v| v != "0") {
            return Err(RegistryError::NoData(ctx.params.raw().to_string()));
        }
        let multiplier = ctx.params.multiplier_or(DEFAULT_MULTIPLIER);
        ctx.record.update(|r| {
            r.multiplier = multiplier;
            r.identity = "mock".to_string();
            r.channels = vec![Channel::new(
                "counter",
                "Synthetic counter",
                "-",
                StatSet::ALL,
            )];
        });

        let mut drv = MockDriver {
            record: ctx.record.clone(),
            window: WindowAggregator::new(WINDOW, 1),
            base: ctx.params.f64_or("value", 0.0),
            ticks: 0,
            closed: false,
        };
        drv.sample();
        ctx.metrics.polls_ok.inc();
        ctx.activate(NAME, None, multiplier);
        info!(device = ctx.index, driver = NAME, "mock device online");
        Ok(Box::new(drv))
    }
}

pub struct MockDriver {
    record: RecordSlot,
    window: WindowAggregator,
    base: f64,
    ticks: i64,
    closed: bool,
}

impl MockDriver {
    fn sample(&mut self) {
        self.ticks += 1;
        let ticks = self.ticks;
        let value = self.base + ticks as f64;
        let window = &mut self.window;
        self.record.update(|r| {
            let multiplier = r.multiplier;
            let upd = window.update(ticks, &[&[value]], multiplier);
            if let Some(ch) = r.channels.first_mut() {
                ch.set_latest(scale(value, multiplier));
                if let Some(w) = upd.values.first().copied().flatten() {
                    ch.set_window(&w);
                }
            }
            r.touch();
        });
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn refresh(&mut self) -> Result<()> {
        if self.closed {
            return Err(RegistryError::Closed);
        }
        self.sample();
        Ok(())
    }

    async fn teardown(&mut self) {
        self.closed = true;
        self.record.update(|r| r.deactivate());
    }
}
