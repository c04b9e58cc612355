//! Software camera backing the transport traits.
//!
//! Stands in for a vendor transport during development and in tests: a
//! GenICam-style node table with real ranges and auto-gating, paced
//! synthetic frames honoring the bounded timeout, and optional
//! incomplete-frame injection. A shared [`SimProbe`] records every
//! successful node write so tests can assert exactly what reached the
//! device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use super::frame::PixelFormat;
use super::transport::{
    CameraDevice, CameraSystem, DeviceDescriptor, NodeError, RawFormat, RawFrame, TransportError,
};

/// Blueprint for one simulated camera.
#[derive(Debug, Clone)]
pub struct SimSpec {
    pub model: String,
    pub serial: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_interval: Duration,
    /// Deliver every Nth frame as incomplete (transport fault injection).
    pub incomplete_every: Option<u64>,
}

impl Default for SimSpec {
    fn default() -> Self {
        Self {
            model: "Iris SimCam".into(),
            serial: "00000001".into(),
            width: 640,
            height: 480,
            pixel_format: PixelFormat::BayerRg8,
            frame_interval: Duration::from_millis(33),
            incomplete_every: None,
        }
    }
}

/// Records successful node writes for test inspection.
#[derive(Debug, Default)]
pub struct SimProbe {
    floats: Mutex<HashMap<String, Vec<f64>>>,
    ints: Mutex<HashMap<String, Vec<i64>>>,
    enums: Mutex<HashMap<String, Vec<String>>>,
}

impl SimProbe {
    pub fn float_writes(&self, node: &str) -> Vec<f64> {
        self.floats.lock().unwrap().get(node).cloned().unwrap_or_default()
    }

    pub fn int_writes(&self, node: &str) -> Vec<i64> {
        self.ints.lock().unwrap().get(node).cloned().unwrap_or_default()
    }

    pub fn enum_writes(&self, node: &str) -> Vec<String> {
        self.enums.lock().unwrap().get(node).cloned().unwrap_or_default()
    }

    fn record_float(&self, node: &str, value: f64) {
        self.floats.lock().unwrap().entry(node.into()).or_default().push(value);
    }

    fn record_int(&self, node: &str, value: i64) {
        self.ints.lock().unwrap().entry(node.into()).or_default().push(value);
    }

    fn record_enum(&self, node: &str, entry: &str) {
        self.enums.lock().unwrap().entry(node.into()).or_default().push(entry.into());
    }
}

/// Simulated transport entry point.
pub struct SimSystem {
    specs: Vec<SimSpec>,
    probe: Arc<SimProbe>,
}

impl SimSystem {
    pub fn new(specs: Vec<SimSpec>) -> Self {
        Self {
            specs,
            probe: Arc::new(SimProbe::default()),
        }
    }

    pub fn single(spec: SimSpec) -> Self {
        Self::new(vec![spec])
    }

    /// A transport with nothing plugged in.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn probe(&self) -> Arc<SimProbe> {
        Arc::clone(&self.probe)
    }
}

impl CameraSystem for SimSystem {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        Ok(self
            .specs
            .iter()
            .map(|s| DeviceDescriptor {
                model: s.model.clone(),
                serial: s.serial.clone(),
            })
            .collect())
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn CameraDevice>, TransportError> {
        let spec = self
            .specs
            .iter()
            .find(|s| s.serial == descriptor.serial)
            .ok_or_else(|| {
                TransportError::DeviceUnavailable(format!("no such device {}", descriptor.serial))
            })?;
        Ok(Box::new(SimDevice::new(spec.clone(), Arc::clone(&self.probe))))
    }
}

struct FloatNode {
    value: f64,
    min: f64,
    max: f64,
    /// Enumeration node that locks this one unless set to "Off".
    auto_gate: Option<&'static str>,
}

struct EnumNode {
    value: String,
    entries: &'static [&'static str],
}

struct IntNode {
    value: i64,
    min: i64,
    max: i64,
}

pub struct SimDevice {
    spec: SimSpec,
    descriptor: DeviceDescriptor,
    probe: Arc<SimProbe>,
    floats: HashMap<&'static str, FloatNode>,
    ints: HashMap<&'static str, IntNode>,
    enums: HashMap<&'static str, EnumNode>,
    acquiring: bool,
    sequence: u64,
    next_due: Instant,
}

impl SimDevice {
    fn new(spec: SimSpec, probe: Arc<SimProbe>) -> Self {
        let mut floats = HashMap::new();
        floats.insert(
            "ExposureTime",
            FloatNode {
                value: 10_000.0,
                min: 30.0,
                max: 30_000_000.0,
                auto_gate: Some("ExposureAuto"),
            },
        );
        floats.insert(
            "Gain",
            FloatNode {
                value: 0.0,
                min: 0.0,
                max: 47.99,
                auto_gate: Some("GainAuto"),
            },
        );
        floats.insert(
            "BalanceRatio",
            FloatNode {
                value: 1.0,
                min: 0.25,
                max: 4.0,
                auto_gate: Some("BalanceWhiteAuto"),
            },
        );

        let mut ints = HashMap::new();
        ints.insert(
            "StreamPacketSize",
            IntNode {
                value: 1_500,
                min: 576,
                max: 9_000,
            },
        );

        let mut enums = HashMap::new();
        enums.insert(
            "ExposureAuto",
            EnumNode {
                value: "Continuous".into(),
                entries: &["Off", "Once", "Continuous"],
            },
        );
        enums.insert(
            "GainAuto",
            EnumNode {
                value: "Continuous".into(),
                entries: &["Off", "Once", "Continuous"],
            },
        );
        enums.insert(
            "BalanceWhiteAuto",
            EnumNode {
                value: "Continuous".into(),
                entries: &["Off", "Continuous"],
            },
        );
        enums.insert(
            "BalanceRatioSelector",
            EnumNode {
                value: "Red".into(),
                entries: &["Red", "Blue"],
            },
        );
        enums.insert(
            "PixelFormat",
            EnumNode {
                value: spec.pixel_format.node_entry().into(),
                entries: &[
                    "Mono8", "RGB8", "BGR8", "BayerRG8", "BayerBG8", "BayerGB8", "BayerGR8",
                ],
            },
        );
        enums.insert(
            "StreamBufferHandlingMode",
            EnumNode {
                value: "OldestFirst".into(),
                entries: &["OldestFirst", "OldestFirstOverwrite", "NewestOnly"],
            },
        );

        let descriptor = DeviceDescriptor {
            model: spec.model.clone(),
            serial: spec.serial.clone(),
        };
        Self {
            spec,
            descriptor,
            probe,
            floats,
            ints,
            enums,
            acquiring: false,
            sequence: 0,
            next_due: Instant::now(),
        }
    }

    fn current_format(&self) -> RawFormat {
        let entry = &self.enums["PixelFormat"].value;
        match PixelFormat::from_node_entry(entry) {
            Some(pf) => RawFormat::Known(pf),
            None => RawFormat::Other(entry.clone()),
        }
    }

    /// Diagonal gradient that drifts with the sequence number, emitted in
    /// whatever layout the current pixel format calls for.
    fn synthesize(&self) -> Bytes {
        let w = self.spec.width as usize;
        let h = self.spec.height as usize;
        let seq = self.sequence as usize;
        let format = match self.current_format() {
            RawFormat::Known(pf) => pf,
            RawFormat::Other(_) => PixelFormat::Mono8,
        };
        let mut data = Vec::with_capacity(w * h * format.raw_bytes_per_pixel());
        for y in 0..h {
            for x in 0..w {
                let v = ((x + y + seq) % 256) as u8;
                match format {
                    PixelFormat::Rgb8 | PixelFormat::Bgr8 => {
                        data.extend_from_slice(&[v, v.wrapping_add(64), v.wrapping_add(128)]);
                    }
                    _ => data.push(v),
                }
            }
        }
        Bytes::from(data)
    }
}

impl CameraDevice for SimDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn float_range(&self, node: &str) -> Result<(f64, f64), NodeError> {
        let n = self.floats.get(node).ok_or_else(|| NodeError::NotFound(node.into()))?;
        Ok((n.min, n.max))
    }

    fn get_float(&self, node: &str) -> Result<f64, NodeError> {
        let n = self.floats.get(node).ok_or_else(|| NodeError::NotFound(node.into()))?;
        Ok(n.value)
    }

    fn set_float(&mut self, node: &str, value: f64) -> Result<(), NodeError> {
        let gate = self
            .floats
            .get(node)
            .ok_or_else(|| NodeError::NotFound(node.into()))?
            .auto_gate;
        if let Some(gate) = gate {
            // Manual writes are locked out while the auto control owns the
            // node, exactly as GenICam devices behave.
            if self.enums[gate].value != "Off" {
                return Err(NodeError::NotWritable(node.into()));
            }
        }
        let n = self
            .floats
            .get_mut(node)
            .ok_or_else(|| NodeError::NotFound(node.into()))?;
        if !(n.min..=n.max).contains(&value) {
            return Err(NodeError::NotWritable(node.into()));
        }
        n.value = value;
        self.probe.record_float(node, value);
        Ok(())
    }

    fn int_range(&self, node: &str) -> Result<(i64, i64), NodeError> {
        let n = self.ints.get(node).ok_or_else(|| NodeError::NotFound(node.into()))?;
        Ok((n.min, n.max))
    }

    fn set_int(&mut self, node: &str, value: i64) -> Result<(), NodeError> {
        let n = self.ints.get_mut(node).ok_or_else(|| NodeError::NotFound(node.into()))?;
        if !(n.min..=n.max).contains(&value) {
            return Err(NodeError::NotWritable(node.into()));
        }
        n.value = value;
        self.probe.record_int(node, value);
        Ok(())
    }

    fn get_enum(&self, node: &str) -> Result<String, NodeError> {
        let n = self.enums.get(node).ok_or_else(|| NodeError::NotFound(node.into()))?;
        Ok(n.value.clone())
    }

    fn set_enum(&mut self, node: &str, entry: &str) -> Result<(), NodeError> {
        let n = self.enums.get_mut(node).ok_or_else(|| NodeError::NotFound(node.into()))?;
        if !n.entries.contains(&entry) {
            return Err(NodeError::NotAvailable(format!("{node} entry {entry}")));
        }
        n.value = entry.into();
        self.probe.record_enum(node, entry);
        Ok(())
    }

    fn begin_acquisition(&mut self) -> Result<(), TransportError> {
        if self.acquiring {
            return Err(TransportError::DeviceUnavailable("already acquiring".into()));
        }
        self.acquiring = true;
        self.next_due = Instant::now();
        debug!(serial = %self.descriptor.serial, "sim acquisition started");
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), TransportError> {
        if !self.acquiring {
            return Err(TransportError::NotAcquiring);
        }
        self.acquiring = false;
        debug!(serial = %self.descriptor.serial, "sim acquisition ended");
        Ok(())
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<RawFrame, TransportError> {
        if !self.acquiring {
            return Err(TransportError::NotAcquiring);
        }
        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Err(TransportError::Timeout);
            }
            thread::sleep(wait);
        }
        self.next_due = Instant::now() + self.spec.frame_interval;
        self.sequence += 1;

        if let Some(n) = self.spec.incomplete_every {
            if self.sequence % n == 0 {
                return Err(TransportError::IncompleteFrame);
            }
        }

        Ok(RawFrame {
            data: self.synthesize(),
            width: self.spec.width,
            height: self.spec.height,
            format: self.current_format(),
        })
    }
}
