use crate::window::WindowValues;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Which values a channel publishes. Unpublished statistics stay `None` forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSet {
    pub latest: bool,
    pub mean: bool,
    pub max: bool,
    pub min: bool,
}

impl StatSet {
    pub const ALL: StatSet = StatSet {
        latest: true,
        mean: true,
        max: true,
        min: true,
    };
    pub const LATEST: StatSet = StatSet {
        latest: true,
        mean: false,
        max: false,
        min: false,
    };
    pub const MEAN: StatSet = StatSet {
        latest: false,
        mean: true,
        max: false,
        min: false,
    };
    pub const MIN: StatSet = StatSet {
        latest: false,
        mean: false,
        max: false,
        min: true,
    };
    pub const LATEST_MEAN: StatSet = StatSet {
        latest: true,
        mean: true,
        max: false,
        min: false,
    };
}

/// Static description of a channel, used by drivers with a fixed channel set.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSpec {
    pub key: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub stats: StatSet,
}

/// One measurable quantity of a device. Values are device readings scaled by
/// the record multiplier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub key: String,
    pub description: String,
    pub unit: String,
    #[serde(skip)]
    pub stats: StatSet,
    pub latest: Option<i64>,
    pub mean_window: Option<i64>,
    pub max_window: Option<i64>,
    pub min_window: Option<i64>,
}

impl Channel {
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        stats: StatSet,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            unit: unit.into(),
            stats,
            latest: None,
            mean_window: None,
            max_window: None,
            min_window: None,
        }
    }

    pub fn set_latest(&mut self, value: i64) {
        if self.stats.latest {
            self.latest = Some(value);
        }
    }

    pub fn set_mean(&mut self, value: i64) {
        if self.stats.mean {
            self.mean_window = Some(value);
        }
    }

    pub fn set_window(&mut self, w: &WindowValues) {
        self.set_mean(w.mean);
        if self.stats.max {
            self.max_window = Some(w.max);
        }
        if self.stats.min {
            self.min_window = Some(w.min);
        }
    }
}

impl From<&ChannelSpec> for Channel {
    fn from(spec: &ChannelSpec) -> Self {
        Channel::new(spec.key, spec.description, spec.unit, spec.stats)
    }
}

/// One configured meter or sensor, addressed by the façade through `index`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceRecord {
    /// 1-based table position.
    pub index: usize,
    pub driver: String,
    /// Model/type string; empty until the device reports it.
    pub identity: String,
    /// Network address or serial device path.
    pub address: Option<String>,
    pub hardware_address: Option<String>,
    pub signal_quality: Option<i64>,
    pub multiplier: i64,
    pub channels: Vec<Channel>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl DeviceRecord {
    pub fn new(index: usize, driver: impl Into<String>) -> Self {
        Self {
            index,
            driver: driver.into(),
            multiplier: 1,
            ..Default::default()
        }
    }

    pub fn channel(&self, key: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.key == key)
    }

    pub fn channel_mut(&mut self, key: &str) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.key == key)
    }

    /// First write wins; an empty value never sets the identity.
    pub fn set_identity_once(&mut self, identity: &str) {
        if self.identity.is_empty() && !identity.is_empty() {
            self.identity = identity.to_string();
        }
    }

    pub fn set_hardware_address_once(&mut self, mac: &str) {
        if self.hardware_address.is_none() && !mac.is_empty() {
            self.hardware_address = Some(mac.to_string());
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc().format(&Rfc3339).ok();
    }

    /// Marks the record torn down and drops the driver-owned channel list.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_first_write_wins() {
        let mut rec = DeviceRecord::new(1, "p1ib");
        rec.set_identity_once("");
        assert!(rec.identity.is_empty());
        rec.set_identity_once("KFM5KAIFA-METER");
        rec.set_identity_once("other");
        assert_eq!(rec.identity, "KFM5KAIFA-METER");

        rec.set_hardware_address_once("aa:bb:cc:dd:ee:ff");
        rec.set_hardware_address_once("11:22:33:44:55:66");
        assert_eq!(rec.hardware_address.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_unpublished_statistics_stay_invalid() {
        let mut ch = Channel::new("min_water_temp_day", "Day minimum", "C", StatSet::MIN);
        ch.set_latest(5);
        ch.set_window(&WindowValues {
            mean: 1,
            max: 2,
            min: 0,
        });
        assert_eq!(ch.latest, None);
        assert_eq!(ch.mean_window, None);
        assert_eq!(ch.max_window, None);
        assert_eq!(ch.min_window, Some(0));
    }

    #[test]
    fn test_deactivate_clears_channels() {
        let mut rec = DeviceRecord::new(2, "mock");
        rec.active = true;
        rec.channels.push(Channel::new("x", "x", "-", StatSet::ALL));
        rec.deactivate();
        rec.deactivate();
        assert!(!rec.active);
        assert!(rec.channels.is_empty());
    }
}
