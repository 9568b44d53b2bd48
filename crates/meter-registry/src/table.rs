use crate::DeviceRecord;
use std::sync::{Arc, PoisonError, RwLock};

/// Read side consumed by the management façade.
pub trait MeterTable {
    fn record_count(&self) -> usize;

    /// 1-based lookup. `None` for out-of-range indices and torn-down devices.
    fn record(&self, index: usize) -> Option<DeviceRecord>;
}

/// One record behind its own lock. The owning driver is the only writer;
/// readers get clones, so a reader never observes a half-applied payload.
#[derive(Clone, Debug)]
pub struct RecordSlot(Arc<RwLock<DeviceRecord>>);

impl RecordSlot {
    pub fn new(record: DeviceRecord) -> Self {
        Self(Arc::new(RwLock::new(record)))
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut DeviceRecord) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn read<R>(&self, f: impl FnOnce(&DeviceRecord) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn snapshot(&self) -> DeviceRecord {
        self.read(DeviceRecord::clone)
    }

    pub fn is_active(&self) -> bool {
        self.read(|r| r.active)
    }

    /// Put the slot back to an empty, inactive record for `driver`.
    pub fn reset(&self, driver: &str) {
        self.update(|r| {
            let index = r.index;
            *r = DeviceRecord::new(index, driver);
        });
    }
}

/// Fixed-size record table, allocated once at startup. Positions never move.
#[derive(Clone, Debug)]
pub struct DeviceTable {
    slots: Arc<[RecordSlot]>,
}

impl DeviceTable {
    pub fn with_len(len: usize) -> Self {
        let slots: Vec<RecordSlot> = (1..=len)
            .map(|index| RecordSlot::new(DeviceRecord::new(index, "")))
            .collect();
        Self {
            slots: slots.into(),
        }
    }

    /// 1-based slot access for writers.
    pub fn slot(&self, index: usize) -> Option<&RecordSlot> {
        index.checked_sub(1).and_then(|i| self.slots.get(i))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Snapshots of every active record, in table order.
    pub fn active_records(&self) -> Vec<DeviceRecord> {
        self.slots
            .iter()
            .map(RecordSlot::snapshot)
            .filter(|r| r.active)
            .collect()
    }
}

impl MeterTable for DeviceTable {
    fn record_count(&self) -> usize {
        self.slots.len()
    }

    fn record(&self, index: usize) -> Option<DeviceRecord> {
        self.slot(index)
            .map(RecordSlot::snapshot)
            .filter(|r| r.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_based_lookup() {
        let table = DeviceTable::with_len(2);
        assert_eq!(table.record_count(), 2);
        assert!(table.slot(0).is_none());
        assert!(table.slot(3).is_none());
        assert_eq!(table.slot(2).unwrap().snapshot().index, 2);
    }

    #[test]
    fn test_inactive_records_are_hidden() {
        let table = DeviceTable::with_len(1);
        assert!(table.record(1).is_none());

        table.slot(1).unwrap().update(|r| {
            r.active = true;
            r.identity = "TEMPerX232".into();
        });
        assert_eq!(table.record(1).unwrap().identity, "TEMPerX232");

        table.slot(1).unwrap().update(|r| r.deactivate());
        assert!(table.record(1).is_none());
        assert!(table.record(7).is_none());
    }

    #[test]
    fn test_writer_and_reader_share_slot() {
        let table = DeviceTable::with_len(1);
        let writer = table.slot(1).unwrap().clone();
        let reader = table.clone();
        writer.update(|r| {
            r.active = true;
            r.multiplier = 1000;
        });
        assert_eq!(reader.record(1).unwrap().multiplier, 1000);
        assert_eq!(reader.active_records().len(), 1);
    }
}
