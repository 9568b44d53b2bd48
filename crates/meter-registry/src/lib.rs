//! meter-registry: normalized meter records, windowed statistics and the
//! drivers that fill them
//!
//! The registry reads an ordered list of `{driver, parameters}` entries,
//! creates one driver per entry and hands the resulting record table to
//! whatever publishes it. Records are written only by their own driver and
//! read as snapshots.

mod types;
pub use types::{Channel, ChannelSpec, DeviceRecord, StatSet};

pub mod window;
pub use window::{WindowAggregator, WindowUpdate, WindowValues};

mod error;
pub use error::{RegistryError, Result};

mod table;
pub use table::{DeviceTable, MeterTable, RecordSlot};

mod params;
pub use params::DriverParams;

mod metrics;
pub use metrics::{DeviceMetrics, MetricsHub};

pub mod json_meter;
pub mod sensor;

pub mod drivers;
pub use drivers::{Driver, DriverContext, DriverFactory};

mod registry;
pub use registry::{DeviceRegistry, DriverCatalog};

mod config;
pub use config::{load_config_file, MeterConfig, MeterEntry, DEFAULT_POLL_INTERVAL_SECS};

#[cfg(test)]
mod test_support;
