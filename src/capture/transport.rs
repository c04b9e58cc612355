//! Device transport boundary.
//!
//! GigE-class cameras are reached through a vendor transport layer. The
//! capture pipeline only depends on the capability set below: enumerate and
//! open devices, begin/end acquisition, pull the next frame under a bounded
//! timeout, and read/write named configuration nodes with range and
//! writability queries. Any transport that can express those operations can
//! back a [`DeviceSession`](super::session::DeviceSession); the crate ships
//! a software implementation in [`sim`](super::sim).

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use super::frame::PixelFormat;

/// Identity of one enumerable camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub model: String,
    pub serial: String,
}

/// Wire pixel format as reported by the transport. Devices can stream
/// formats the decoder has no kernel for; those arrive as `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFormat {
    Known(PixelFormat),
    Other(String),
}

impl RawFormat {
    pub fn name(&self) -> &str {
        match self {
            RawFormat::Known(pf) => pf.node_entry(),
            RawFormat::Other(name) => name,
        }
    }
}

/// One undecoded frame as delivered by the transport. The payload is
/// released by dropping the `Bytes`; nothing downstream may hold a
/// reference into transport-owned memory.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: RawFormat,
}

/// Named-node access failures. These are expected values, not exceptions:
/// setters log and continue when a node is missing or locked.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("node {0} not found")]
    NotFound(String),

    #[error("node {0} not available")]
    NotAvailable(String),

    #[error("node {0} not writable")]
    NotWritable(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// No frame arrived within the bounded wait. Expected while settings
    /// change; the read loop retries silently.
    #[error("timed out waiting for frame")]
    Timeout,

    /// The transport delivered a partial buffer. Discard and continue.
    #[error("incomplete frame")]
    IncompleteFrame,

    #[error("acquisition not running")]
    NotAcquiring,

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Entry point of a transport: device discovery and opening.
pub trait CameraSystem: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Open and initialize one device for exclusive use. The returned
    /// handle must only ever be driven from a single thread.
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn CameraDevice>, TransportError>;
}

/// One opened camera. Dropping the handle releases the device.
pub trait CameraDevice: Send {
    fn descriptor(&self) -> &DeviceDescriptor;

    fn float_range(&self, node: &str) -> Result<(f64, f64), NodeError>;
    fn get_float(&self, node: &str) -> Result<f64, NodeError>;
    fn set_float(&mut self, node: &str, value: f64) -> Result<(), NodeError>;

    fn int_range(&self, node: &str) -> Result<(i64, i64), NodeError>;
    fn set_int(&mut self, node: &str, value: i64) -> Result<(), NodeError>;

    fn get_enum(&self, node: &str) -> Result<String, NodeError>;
    fn set_enum(&mut self, node: &str, entry: &str) -> Result<(), NodeError>;

    fn begin_acquisition(&mut self) -> Result<(), TransportError>;
    fn end_acquisition(&mut self) -> Result<(), TransportError>;

    /// Block for at most `timeout` waiting for the next frame.
    fn next_frame(&mut self, timeout: Duration) -> Result<RawFrame, TransportError>;
}

/// Clamp `requested` into the node's reported range and write it.
/// Returns the value actually applied.
pub fn set_float_clamped(
    device: &mut dyn CameraDevice,
    node: &str,
    requested: f64,
) -> Result<f64, NodeError> {
    let (min, max) = device.float_range(node)?;
    let value = requested.clamp(min, max);
    if value != requested {
        tracing::debug!(node, requested, applied = value, "clamped into device range");
    }
    device.set_float(node, value)?;
    Ok(value)
}

/// Integer twin of [`set_float_clamped`].
pub fn set_int_clamped(
    device: &mut dyn CameraDevice,
    node: &str,
    requested: i64,
) -> Result<i64, NodeError> {
    let (min, max) = device.int_range(node)?;
    let value = requested.clamp(min, max);
    if value != requested {
        tracing::debug!(node, requested, applied = value, "clamped into device range");
    }
    device.set_int(node, value)?;
    Ok(value)
}
