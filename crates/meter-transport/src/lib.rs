//! meter-transport: wire-level access to metering hardware
//!
//! Two transports are provided: a request/response serial link for USB sensors
//! speaking a line-oriented ASCII protocol, and an HTTP chunk source for meters
//! that stream concatenated JSON objects. Backends are feature-gated; the
//! default build enables only the `mock` serial backend so that dependants can
//! compile and test without hardware.

mod types;
pub use types::{LinkSettings, PortInfo};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::SerialLink;

mod frame;
pub use frame::{FrameEvent, JsonAccumulator, MAX_FRAME_BYTES};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockLink;

#[cfg(feature = "tty")]
mod tty;

#[cfg(feature = "tty")]
pub use tty::TtyLink;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpSource;
