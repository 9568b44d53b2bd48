use crate::{LinkSettings, PortInfo, Result, SerialLink, TransportError};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use tracing::{debug, trace};

/// Request/response ASCII protocol over a local tty (USB thermometers and similar).
pub struct TtyLink {
    path: String,
    port: Box<dyn SerialPort>,
    settings: LinkSettings,
}

impl TtyLink {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The builder claims the port exclusively on unix; a second opener fails.
    fn open_port(path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialPort>> {
        serialport::new(path, settings.baud)
            .timeout(settings.quiet_timeout)
            .open()
            .map_err(|e| Self::map_open_error(path, e))
    }

    fn map_open_error(path: &str, e: serialport::Error) -> TransportError {
        match e.kind() {
            // serialport reports both a missing node and a failed exclusive
            // lock as NoDevice; only the description tells them apart
            serialport::ErrorKind::NoDevice if is_missing(&e.description) => {
                TransportError::NotFound(path.to_string())
            }
            serialport::ErrorKind::NoDevice => TransportError::Busy(path.to_string()),
            serialport::ErrorKind::Io(ErrorKind::NotFound) => {
                TransportError::NotFound(path.to_string())
            }
            _ => TransportError::Io(format!("{path}: {e}")),
        }
    }

    /// Discard whatever is still arriving after an oversized response.
    fn drain(&mut self) {
        let mut scratch = [0u8; 64];
        while let Ok(n) = self.port.read(&mut scratch) {
            if n == 0 {
                break;
            }
        }
    }
}

impl SerialLink for TtyLink {
    fn open(path: &str, settings: &LinkSettings) -> Result<Self> {
        let port = Self::open_port(path, settings)?;
        debug!(path, baud = settings.baud, "serial port opened");
        Ok(TtyLink {
            path: path.to_string(),
            port,
            settings: *settings,
        })
    }

    fn list() -> Result<Vec<PortInfo>> {
        let mut out = Vec::new();
        for p in serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))? {
            let driver = match p.port_type {
                SerialPortType::UsbPort(_) => "usb-serial",
                _ => "serial",
            };
            out.push(PortInfo {
                name: p.port_name,
                driver: driver.to_string(),
            });
        }
        Ok(out)
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        // Stale bytes from an earlier, drained response must not prefix this one
        let _ = self.port.clear(ClearBuffer::Input);
        let mut cmd = Vec::with_capacity(line.len() + 1);
        cmd.extend_from_slice(line.as_bytes());
        cmd.push(b'\n');
        self.port
            .write_all(&cmd)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    fn read_response(&mut self) -> Result<String> {
        let mut buf = [0u8; 64];
        let mut acc: Vec<u8> = Vec::with_capacity(self.settings.max_response);
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    acc.extend(buf[..n].iter().copied().filter(|&b| b > 0x0d));
                    if acc.len() >= self.settings.max_response {
                        acc.truncate(self.settings.max_response.saturating_sub(1));
                        self.drain();
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
        trace!(path = %self.path, bytes = acc.len(), "serial response");
        Ok(String::from_utf8_lossy(&acc).into_owned())
    }
}

/// ENOENT and ENODEV descriptions; anything else under NoDevice is a lock failure.
fn is_missing(description: &str) -> bool {
    description.contains("No such file") || description.contains("No such device")
}
