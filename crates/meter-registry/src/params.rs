use std::collections::BTreeMap;
use std::time::Duration;

/// Flat `key=value` parameter string handed to a driver, e.g.
/// `ip=192.168.1.40,multiplier=1000`.
///
/// Pairs are separated by commas; surrounding whitespace is ignored and so are
/// keys a driver does not know about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverParams {
    raw: String,
    values: BTreeMap<String, String>,
}

impl DriverParams {
    pub fn parse(raw: &str) -> Self {
        let mut values = BTreeMap::new();
        for pair in raw.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            values
                .entry(key.to_ascii_lowercase())
                .or_insert_with(|| value.trim().to_string());
        }
        Self {
            raw: raw.to_string(),
            values,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn ip(&self) -> Option<&str> {
        self.get("ip")
    }

    pub fn device(&self) -> Option<&str> {
        self.get("device")
    }

    /// Configured multiplier, or `default` when absent. Values below one
    /// (including unparsable ones) clamp to one.
    pub fn multiplier_or(&self, default: i64) -> i64 {
        match self.get("multiplier") {
            Some(v) => leading_int(v).max(1),
            None => default,
        }
    }

    /// `interval=` in seconds (fractions allowed).
    pub fn interval_or(&self, default: Duration) -> Duration {
        self.get("interval")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(default)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default)
    }
}

/// Integer prefix of `s` (`"100x"` → 100, `"abc"` → 0).
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (neg, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    let v = digits[..end].parse::<i64>().unwrap_or(0);
    if neg {
        -v
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognized_keys() {
        let p = DriverParams::parse("ip=192.168.1.40, multiplier=1000,colour=blue");
        assert_eq!(p.ip(), Some("192.168.1.40"));
        assert_eq!(p.device(), None);
        assert_eq!(p.multiplier_or(1), 1000);
        assert_eq!(p.get("colour"), Some("blue"));
    }

    #[test]
    fn test_multiplier_defaults_and_clamps() {
        assert_eq!(DriverParams::parse("device=/dev/ttyUSB1").multiplier_or(100), 100);
        assert_eq!(DriverParams::parse("multiplier=0").multiplier_or(100), 1);
        assert_eq!(DriverParams::parse("multiplier=-5").multiplier_or(100), 1);
        assert_eq!(DriverParams::parse("multiplier=junk").multiplier_or(100), 1);
        assert_eq!(DriverParams::parse("multiplier=250ms").multiplier_or(1), 250);
    }

    #[test]
    fn test_interval_seconds() {
        let p = DriverParams::parse("interval=0.25");
        assert_eq!(p.interval_or(Duration::from_secs(10)), Duration::from_millis(250));
        let p = DriverParams::parse("interval=-1");
        assert_eq!(p.interval_or(Duration::from_secs(10)), Duration::from_secs(10));
    }

    #[test]
    fn test_empty_and_malformed_pairs_are_ignored() {
        let p = DriverParams::parse(",,=x,novalue,device=");
        assert_eq!(p.device(), None);
        assert_eq!(p.raw(), ",,=x,novalue,device=");
    }
}
