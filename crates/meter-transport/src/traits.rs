use crate::{LinkSettings, PortInfo, Result, TransportError};

/// A blocking request/response serial line.
pub trait SerialLink: Send {
    /// Open a device node (e.g., "/dev/ttyUSB0") and claim it exclusively.
    fn open(path: &str, settings: &LinkSettings) -> Result<Self>
    where
        Self: Sized;

    /// Attempt to list available ports for this backend.
    fn list() -> Result<Vec<PortInfo>>
    where
        Self: Sized,
    {
        Err(TransportError::Unsupported("port listing not supported"))
    }

    /// Write one command line; the terminator is appended by the backend.
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Read until the line goes quiet. Control bytes (<= 0x0D) are stripped.
    fn read_response(&mut self) -> Result<String>;

    /// Send a command and collect its response.
    fn exchange(&mut self, command: &str) -> Result<String> {
        self.send_line(command)?;
        self.read_response()
    }
}
