//! Line protocol of TEMPer-style USB thermometers.
//!
//! `ReadTemp` answers with fields such as
//! `Temp-Inner:22.81 [C],34.20 [%RH]Temp-Outer:5.10 [C]`. A `Temp-` field
//! followed by a comma carries a humidity companion that gets a `Humidity-`
//! description of its own.

use meter_transport::SerialLink;

use crate::Result;

pub const VERSION_COMMAND: &str = "Version";
pub const READ_COMMAND: &str = "ReadTemp";

/// Fields beyond this count are ignored.
pub const MAX_READINGS: usize = 10;
const DESCRIPTION_CHARS: usize = 19;
const UNIT_CHARS: usize = 4;

/// Weight of a fresh reading in the published average.
pub const PUBLISH_BLEND: f64 = 0.05;
/// Weight of the same reading in the follow-up blend that is kept but not published.
pub const SETTLE_BLEND: f64 = 0.10;

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub description: String,
    pub value: f64,
    pub unit: String,
}

/// Tokenize a `ReadTemp` response into readings sorted by description,
/// one per description.
pub fn parse_readings(response: &str) -> Vec<Reading> {
    let mut out = Vec::new();
    let mut rest = response;

    while out.len() < MAX_READINGS {
        let Some(start) = rest.find("Temp-") else {
            break;
        };
        rest = &rest[start..];
        let description: String = rest
            .split(':')
            .next()
            .unwrap_or_default()
            .chars()
            .take(DESCRIPTION_CHARS)
            .collect();

        let Some(colon) = rest.find(':') else {
            break;
        };
        rest = &rest[colon + 1..];
        let value = leading_float(rest);
        let Some((unit, after)) = bracketed_unit(rest) else {
            continue;
        };
        rest = after;

        let companion = rest.strip_prefix(',');
        out.push(Reading {
            description,
            value,
            unit,
        });

        let Some(tail) = companion else {
            continue;
        };
        rest = tail;
        if out.len() == MAX_READINGS {
            break;
        }
        let value = leading_float(rest);
        if let Some((unit, after)) = bracketed_unit(rest) {
            let suffix = out
                .last()
                .and_then(|r| r.description.get("Temp-".len()..))
                .unwrap_or_default();
            let description = format!("Humidity-{suffix}")
                .chars()
                .take(DESCRIPTION_CHARS)
                .collect();
            out.push(Reading {
                description,
                value,
                unit,
            });
            rest = after;
        }
    }

    out.sort_by(|a, b| a.description.cmp(&b.description));
    // channel keys must be unique; the first field with a description wins
    out.dedup_by(|later, first| later.description == first.description);
    out
}

/// Unit between the next `[` and `]`, plus the text after the `]`.
fn bracketed_unit(s: &str) -> Option<(String, &str)> {
    let open = s.find('[')?;
    let inner = &s[open + 1..];
    let close = inner.find(']')?;
    let unit = inner[..close].chars().take(UNIT_CHARS).collect();
    Some((unit, &inner[close + 1..]))
}

/// Numeric prefix of `s` after leading whitespace; 0.0 when there is none.
pub fn leading_float(s: &str) -> f64 {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E')))
        .map_or(s.len(), |(i, _)| i);
    (1..=end)
        .rev()
        .find_map(|n| s[..n].parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Pair readings with channel keys by walking both sorted lists once.
/// Entries present on only one side are skipped.
pub fn match_sorted<'a>(
    readings: &'a [Reading],
    keys: &[&str],
) -> Vec<(&'a Reading, usize)> {
    let mut pairs = Vec::new();
    let (mut m, mut n) = (0, 0);
    while m < readings.len() && n < keys.len() {
        match readings[m].description.as_str().cmp(keys[n]) {
            std::cmp::Ordering::Equal => {
                pairs.push((&readings[m], n));
                m += 1;
                n += 1;
            }
            std::cmp::Ordering::Less => m += 1,
            std::cmp::Ordering::Greater => n += 1,
        }
    }
    pairs
}

/// Exponential moving average kept per sensor channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoother {
    average: f64,
}

impl Smoother {
    pub fn new(seed: f64) -> Self {
        Self { average: seed }
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    /// Blend `value` in and return the average to publish.
    pub fn publish(&mut self, value: f64) -> f64 {
        self.average = (1.0 - PUBLISH_BLEND) * self.average + PUBLISH_BLEND * value;
        self.average
    }

    /// Second, unpublished blend applied after every refresh.
    pub fn settle(&mut self, value: f64) {
        self.average = (1.0 - SETTLE_BLEND) * self.average + SETTLE_BLEND * value;
    }
}

pub fn query_version(link: &mut dyn SerialLink) -> Result<String> {
    Ok(link.exchange(VERSION_COMMAND)?.trim().to_string())
}

pub fn query_readings(link: &mut dyn SerialLink) -> Result<Vec<Reading>> {
    Ok(parse_readings(&link.exchange(READ_COMMAND)?))
}
