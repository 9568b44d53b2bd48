use crate::{LinkSettings, PortInfo, Result, SerialLink, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    responses: HashMap<String, String>,
    pending: Option<String>,
    sent: Vec<String>,
}

/// A scripted in-process serial device. Clones share the same script, so a
/// test can keep one handle and change responses while a driver owns another.
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with `response` from now on.
    pub fn respond(&self, command: &str, response: &str) {
        if let Ok(mut st) = self.state.lock() {
            st.responses
                .insert(command.to_string(), response.to_string());
        }
    }

    /// Commands written so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|st| st.sent.clone())
            .unwrap_or_default()
    }
}

impl SerialLink for MockLink {
    fn open(_path: &str, _settings: &LinkSettings) -> Result<Self> {
        Ok(Self::new())
    }

    fn list() -> Result<Vec<PortInfo>> {
        Ok(vec![PortInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| TransportError::Io("mock state poisoned".into()))?;
        st.pending = st.responses.get(line).cloned();
        st.sent.push(line.to_string());
        Ok(())
    }

    fn read_response(&mut self) -> Result<String> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| TransportError::Io("mock state poisoned".into()))?;
        // Silence on the line reads back as an empty response
        Ok(st
            .pending
            .take()
            .map(|r| r.chars().filter(|&c| c > '\r').collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_exchange() {
        let probe = MockLink::new();
        probe.respond("Version", "TEMPerX232_V2.0\r\n");
        let mut link = probe.clone();

        assert_eq!(link.exchange("Version").unwrap(), "TEMPerX232_V2.0");
        assert_eq!(link.exchange("ReadTemp").unwrap(), "");
        assert_eq!(probe.sent(), vec!["Version", "ReadTemp"]);
    }
}
