use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct DeviceMetrics {
    pub polls_ok: IntCounter,
    pub polls_failed: IntCounter,
    pub frames_discarded: IntCounter,
    pub frame_overflows: IntCounter,
    pub devices_active: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dev: DeviceMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let polls_ok = counter("meter_polls_ok", "Device polls that delivered data")?;
        let polls_failed = counter("meter_polls_failed", "Device polls that failed")?;
        let frames_discarded = counter(
            "meter_frames_discarded",
            "JSON frames dropped because they did not parse",
        )?;
        let frame_overflows = counter(
            "meter_frame_overflows",
            "JSON accumulator resets caused by oversized input",
        )?;
        let devices_active = IntGauge::new("meter_devices_active", "Devices currently active")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let dev = DeviceMetrics {
            polls_ok,
            polls_failed,
            frames_discarded,
            frame_overflows,
            devices_active,
        };
        let _ = registry.register(Box::new(dev.polls_ok.clone()));
        let _ = registry.register(Box::new(dev.polls_failed.clone()));
        let _ = registry.register(Box::new(dev.frames_discarded.clone()));
        let _ = registry.register(Box::new(dev.frame_overflows.clone()));
        let _ = registry.register(Box::new(dev.devices_active.clone()));
        Ok(Self { registry, dev })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
