//! Driver abstraction: one variant per hardware family, looked up by name.

use crate::{DeviceMetrics, DriverParams, RecordSlot, Result};
use async_trait::async_trait;
use std::time::Duration;

pub mod mock;
pub mod p1ib;
pub mod temper;
pub mod wimbib;

pub use mock::MockFactory;
pub use p1ib::P1ibFactory;
pub use temper::TemperFactory;
pub use wimbib::WimbibFactory;

/// Client timeout for one `/meterData` fetch.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a driver gets at initialization. The driver is the only writer
/// of `record` until it is torn down.
#[derive(Clone)]
pub struct DriverContext {
    pub index: usize,
    pub params: DriverParams,
    pub record: RecordSlot,
    pub metrics: DeviceMetrics,
}

impl DriverContext {
    /// Mark the record live once initialization has fully succeeded.
    pub(crate) fn activate(&self, driver: &str, address: Option<String>, multiplier: i64) {
        self.record.update(|r| {
            r.driver = driver.to_string();
            r.address = address;
            r.multiplier = multiplier;
            r.active = true;
        });
    }
}

/// A live device instance.
#[async_trait]
pub trait Driver: Send {
    fn name(&self) -> &'static str;

    /// One poll cycle. Drivers that poll on their own keep the no-op.
    async fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the transport and deactivate the record. Calling it again is a no-op.
    async fn teardown(&mut self);
}

/// Creates driver instances; registered in a catalog under [`name`](Self::name).
#[async_trait]
pub trait DriverFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open the transport, fetch at least once and declare the channel list.
    /// An error leaves no instance behind.
    async fn initialize(&self, ctx: DriverContext) -> Result<Box<dyn Driver>>;
}
