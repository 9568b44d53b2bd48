use std::time::Duration;

/// Line settings for request/response serial devices.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkSettings {
    pub baud: u32,
    /// A read ends once the line stays silent this long.
    pub quiet_timeout: Duration,
    /// Upper bound on one response; the rest is drained and dropped.
    pub max_response: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud: 9600,
            quiet_timeout: Duration::from_millis(500),
            max_response: 500,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PortInfo {
    pub name: String,
    pub driver: String,
}
