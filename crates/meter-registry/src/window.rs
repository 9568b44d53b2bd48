//! Rolling mean/max/min over the last few window slices of a device.
//!
//! Devices report a monotonically increasing sample counter with every payload.
//! The aggregator keeps one cursor per device (`last_update_counter`) and one
//! ring of slices per channel. Whenever the counter has moved a full window
//! length past the cursor, one slice is folded into every ring and the cursor
//! advances by exactly one window length. All stored values are already scaled
//! by the record multiplier; conversion rounds half away from zero.

use std::collections::VecDeque;

/// A backlog larger than this many ticks is forgiven rather than replayed.
pub const STALE_TICKS: i64 = 10;

/// Cursor position after the device counter runs backwards.
pub const REWIND_TICKS: i64 = 3;

/// Scale a raw reading into the integer domain of the record.
pub fn scale(value: f64, multiplier: i64) -> i64 {
    (value * multiplier as f64).round() as i64
}

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

pub fn max(samples: &[f64]) -> f64 {
    samples.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

pub fn min(samples: &[f64]) -> f64 {
    samples.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

/// Aggregate over a channel's ring, pre-scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowValues {
    pub mean: i64,
    pub max: i64,
    pub min: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slice {
    mean: i64,
    max: i64,
    min: i64,
}

impl Slice {
    fn of(samples: &[f64], multiplier: i64) -> Self {
        Self {
            mean: scale(mean(samples), multiplier),
            max: scale(max(samples), multiplier),
            min: scale(min(samples), multiplier),
        }
    }
}

#[derive(Debug, Default)]
struct ChannelWindow {
    ring: VecDeque<Slice>,
    pending: Vec<f64>,
}

impl ChannelWindow {
    /// Queue a raw sample, keeping at most the newest `len`.
    fn accept(&mut self, sample: f64, len: usize) {
        if self.pending.len() == len {
            self.pending.remove(0);
        }
        self.pending.push(sample);
    }

    fn push_slice(&mut self, slice: Slice, len: usize) {
        if self.ring.len() == len {
            self.ring.pop_front();
        }
        self.ring.push_back(slice);
    }

    fn values(&self) -> Option<WindowValues> {
        if self.ring.is_empty() {
            return None;
        }
        let n = self.ring.len() as f64;
        let sum: f64 = self.ring.iter().map(|s| s.mean as f64).sum();
        Some(WindowValues {
            mean: (sum / n).round() as i64,
            max: self.ring.iter().map(|s| s.max).max().unwrap_or(0),
            min: self.ring.iter().map(|s| s.min).min().unwrap_or(0),
        })
    }
}

/// What one payload did to the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdate {
    /// True when a slice was folded (or the window was seeded).
    pub folded: bool,
    /// Per channel, the new aggregate when this payload changed it.
    pub values: Vec<Option<WindowValues>>,
}

/// Window state private to one driver instance.
#[derive(Debug)]
pub struct WindowAggregator {
    len: usize,
    last_update_counter: i64,
    /// Counter of the newest payload whose samples were queued.
    last_sample_counter: Option<i64>,
    started: bool,
    channels: Vec<ChannelWindow>,
}

impl WindowAggregator {
    /// `len` is both the fold distance in counter ticks and the ring length.
    pub fn new(len: usize, channels: usize) -> Self {
        let len = len.max(1);
        Self {
            len,
            last_update_counter: 0,
            last_sample_counter: None,
            started: false,
            channels: (0..channels).map(|_| ChannelWindow::default()).collect(),
        }
    }

    pub fn window_len(&self) -> usize {
        self.len
    }

    pub fn last_update_counter(&self) -> i64 {
        self.last_update_counter
    }

    /// Feed one payload.
    ///
    /// `samples[i]` holds the raw readings the payload carries for channel `i`,
    /// oldest first: empty when the channel is absent, one value for a plain
    /// reading, more when the device ships recent history.
    pub fn update(&mut self, counter: i64, samples: &[&[f64]], multiplier: i64) -> WindowUpdate {
        let width = self.len as i64;
        let mut values = vec![None; self.channels.len()];

        if !self.started {
            self.started = true;
            let history = samples.iter().map(|s| s.len()).max().unwrap_or(0);
            if history >= self.len {
                self.backfill(samples, multiplier, &mut values);
                self.last_update_counter = counter.saturating_sub(width);
                self.last_sample_counter = Some(counter);
                return WindowUpdate {
                    folded: true,
                    values,
                };
            }
        }

        if counter < self.last_update_counter {
            self.last_update_counter = counter.saturating_sub(REWIND_TICKS);
            self.last_sample_counter = None;
        } else if counter.saturating_sub(self.last_update_counter) > STALE_TICKS {
            self.last_update_counter = counter.saturating_sub(STALE_TICKS);
        }

        // a repeated counter means the device is re-serving its last payload
        if self.last_sample_counter.map_or(true, |last| counter > last) {
            self.last_sample_counter = Some(counter);
            let len = self.len;
            for (win, s) in self.channels.iter_mut().zip(samples) {
                if let Some(newest) = s.last() {
                    win.accept(*newest, len);
                }
            }
        }

        if counter.saturating_sub(self.last_update_counter) < width {
            return WindowUpdate {
                folded: false,
                values,
            };
        }

        let len = self.len;
        for (i, win) in self.channels.iter_mut().enumerate() {
            let current = samples.get(i).copied().unwrap_or(&[]);
            let slice = if current.len() >= len {
                Slice::of(&current[current.len() - len..], multiplier)
            } else if !win.pending.is_empty() {
                Slice::of(&win.pending, multiplier)
            } else {
                continue;
            };
            win.pending.clear();
            win.push_slice(slice, len);
            values[i] = win.values();
        }
        self.last_update_counter = self.last_update_counter.saturating_add(width);
        WindowUpdate {
            folded: true,
            values,
        }
    }

    fn backfill(&mut self, samples: &[&[f64]], multiplier: i64, values: &mut [Option<WindowValues>]) {
        let len = self.len;
        for (i, win) in self.channels.iter_mut().enumerate() {
            let s = samples.get(i).copied().unwrap_or(&[]);
            if s.len() < len {
                if let Some(newest) = s.last() {
                    win.accept(*newest, len);
                }
                continue;
            }
            for v in &s[s.len() - len..] {
                win.push_slice(Slice::of(std::slice::from_ref(v), multiplier), len);
            }
            values[i] = win.values();
        }
    }
}
