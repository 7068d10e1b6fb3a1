//! In-process transport that behaves like a single-camera SDK.
//!
//! Failures are injected by scripting: discovery errors, empty
//! discoveries, open failures, rejected parameter nodes and per-grab
//! outcomes. Every call is recorded in a [`CallLog`] shared with the
//! devices the transport opens.

use super::{
    Device, DeviceDescriptor, DeviceTransport, GrabFailure, GrabOutcome, GrabResult, GrabStrategy,
    Setting, TransportError,
};
use crate::capture::{PixelFormat, RawImage, DEFAULT_MAX_BUFFERS};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DEFAULT_SEED: u64 = 0x5EED;
const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;

/// A transport or device call, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Discovery.
    Enumerate,
    /// Open, by serial number.
    Open(String),
    /// Parameter write.
    Apply(Setting),
    /// Acquisition start.
    StartGrabbing(GrabStrategy),
    /// Acquisition stop.
    StopGrabbing,
    /// Retrieve call, whatever its outcome.
    Retrieve,
    /// Buffer release, by buffer id.
    Release(u64),
    /// Device close.
    Close,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared record of calls made through a simulated transport.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<DeviceEvent>>>);

impl CallLog {
    fn record(&self, event: DeviceEvent) {
        tracing::trace!(?event, "simulated device call");
        lock(&self.0).push(event);
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<DeviceEvent> {
        lock(&self.0).clone()
    }

    /// Number of events matching a predicate.
    pub fn count(&self, predicate: impl Fn(&DeviceEvent) -> bool) -> usize {
        lock(&self.0).iter().filter(|e| predicate(e)).count()
    }

    /// Settings applied so far, in order.
    pub fn applied_settings(&self) -> Vec<Setting> {
        lock(&self.0)
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Apply(setting) => Some(setting.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Outcome of one simulated grab.
#[derive(Debug, Clone)]
pub enum ScriptedGrab {
    /// Deterministic sensor noise in the currently applied pixel format.
    Noise,
    /// A specific raw image.
    Image(RawImage),
    /// A device-reported grab failure.
    Failure(GrabFailure),
    /// No result before the timeout.
    Timeout,
}

/// Queue of upcoming grab outcomes. Once empty, grabs produce noise.
#[derive(Debug, Clone, Default)]
pub struct GrabScript(Arc<Mutex<VecDeque<ScriptedGrab>>>);

impl GrabScript {
    /// Queues an outcome behind those already scripted.
    pub fn push(&self, grab: ScriptedGrab) -> &Self {
        lock(&self.0).push_back(grab);
        self
    }

    fn next(&self) -> ScriptedGrab {
        lock(&self.0).pop_front().unwrap_or(ScriptedGrab::Noise)
    }
}

/// Simulated camera SDK.
#[derive(Debug)]
pub struct SimulatedTransport {
    devices: Vec<DeviceDescriptor>,
    failing_discoveries: u32,
    empty_discoveries: u32,
    failing_opens: u32,
    rejected_nodes: Vec<&'static str>,
    resolution: (u32, u32),
    seed: u64,
    log: CallLog,
    script: GrabScript,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// Creates a transport with one attached GigE camera.
    pub fn new() -> Self {
        Self::with_devices(vec![DeviceDescriptor::new("Simulated acA1920-40gc", "SIM00001")
            .with_address("192.168.1.10")])
    }

    /// Creates a transport with the given devices attached.
    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices,
            failing_discoveries: 0,
            empty_discoveries: 0,
            failing_opens: 0,
            rejected_nodes: Vec::new(),
            resolution: (DEFAULT_WIDTH, DEFAULT_HEIGHT),
            seed: DEFAULT_SEED,
            log: CallLog::default(),
            script: GrabScript::default(),
        }
    }

    /// A transport with nothing attached.
    pub fn without_devices() -> Self {
        Self::with_devices(Vec::new())
    }

    /// The next `count` enumerations fail.
    pub fn fail_discoveries(mut self, count: u32) -> Self {
        self.failing_discoveries = count;
        self
    }

    /// The next `count` enumerations find nothing.
    pub fn empty_discoveries(mut self, count: u32) -> Self {
        self.empty_discoveries = count;
        self
    }

    /// The next `count` opens fail.
    pub fn fail_opens(mut self, count: u32) -> Self {
        self.failing_opens = count;
        self
    }

    /// Opened devices reject writes to this parameter node.
    pub fn reject_setting(mut self, node: &'static str) -> Self {
        self.rejected_nodes.push(node);
        self
    }

    /// Size of generated noise images.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = (width, height);
        self
    }

    /// Seed for generated noise; each opened device starts from it.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Call log shared with all devices opened by this transport.
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Grab script shared with all devices opened by this transport.
    pub fn script(&self) -> GrabScript {
        self.script.clone()
    }
}

impl DeviceTransport for SimulatedTransport {
    type Device = SimulatedDevice;

    fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.log.record(DeviceEvent::Enumerate);
        if self.failing_discoveries > 0 {
            self.failing_discoveries -= 1;
            return Err(TransportError::Enumeration("transport layer unavailable".into()));
        }
        if self.empty_discoveries > 0 {
            self.empty_discoveries -= 1;
            return Ok(Vec::new());
        }
        Ok(self.devices.clone())
    }

    fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<SimulatedDevice, TransportError> {
        self.log
            .record(DeviceEvent::Open(descriptor.serial_number().to_string()));
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(TransportError::Open(format!(
                "{} is in use by another application",
                descriptor.model_name()
            )));
        }
        if !self.devices.contains(descriptor) {
            return Err(TransportError::Open(format!("{} not attached", descriptor)));
        }
        Ok(SimulatedDevice {
            descriptor: descriptor.clone(),
            open: true,
            grabbing: None,
            pixel_format: PixelFormat::BayerRG8,
            max_buffers: DEFAULT_MAX_BUFFERS,
            outstanding: HashSet::new(),
            next_buffer_id: 1,
            rejected_nodes: self.rejected_nodes.clone(),
            resolution: self.resolution,
            rng: ChaCha8Rng::seed_from_u64(self.seed),
            log: self.log.clone(),
            script: self.script.clone(),
        })
    }
}

/// Handle to a simulated camera.
#[derive(Debug)]
pub struct SimulatedDevice {
    descriptor: DeviceDescriptor,
    open: bool,
    grabbing: Option<GrabStrategy>,
    pixel_format: PixelFormat,
    max_buffers: u32,
    outstanding: HashSet<u64>,
    next_buffer_id: u64,
    rejected_nodes: Vec<&'static str>,
    resolution: (u32, u32),
    rng: ChaCha8Rng,
    log: CallLog,
    script: GrabScript,
}

impl SimulatedDevice {
    /// Buffers retrieved but not yet released.
    pub fn outstanding_buffers(&self) -> usize {
        self.outstanding.len()
    }

    /// Strategy of the running acquisition, if any.
    pub fn grab_strategy(&self) -> Option<GrabStrategy> {
        self.grabbing
    }

    fn noise(&mut self) -> RawImage {
        let (width, height) = self.resolution;
        let bytes_per_pixel = self.pixel_format.bytes_per_pixel().unwrap_or(1);
        let mut data = vec![0u8; (width as usize) * (height as usize) * bytes_per_pixel];
        self.rng.fill_bytes(&mut data);
        RawImage::new(width, height, self.pixel_format.clone(), data)
    }
}

impl Device for SimulatedDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn apply(&mut self, setting: &Setting) -> Result<(), TransportError> {
        self.log.record(DeviceEvent::Apply(setting.clone()));
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.rejected_nodes.contains(&setting.node()) {
            return Err(TransportError::Parameter {
                node: setting.node(),
                reason: "value out of range".into(),
            });
        }
        match setting {
            Setting::PixelFormat(format) => self.pixel_format = format.clone(),
            Setting::MaxNumBuffer(count) => self.max_buffers = *count,
            _ => {}
        }
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        self.grabbing.is_some()
    }

    fn start_grabbing(&mut self, strategy: GrabStrategy) -> Result<(), TransportError> {
        self.log.record(DeviceEvent::StartGrabbing(strategy));
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.grabbing = Some(strategy);
        Ok(())
    }

    fn stop_grabbing(&mut self) -> Result<(), TransportError> {
        self.log.record(DeviceEvent::StopGrabbing);
        self.grabbing = None;
        Ok(())
    }

    fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult, TransportError> {
        self.log.record(DeviceEvent::Retrieve);
        if self.grabbing.is_none() {
            return Err(TransportError::Acquisition("acquisition not started".into()));
        }
        if self.outstanding.len() >= self.max_buffers as usize {
            return Err(TransportError::Acquisition(format!(
                "all {} buffers are queued or unreleased",
                self.max_buffers
            )));
        }

        let outcome = match self.script.next() {
            ScriptedGrab::Timeout => return Err(TransportError::Timeout(timeout)),
            ScriptedGrab::Noise => GrabOutcome::Image(self.noise()),
            ScriptedGrab::Image(image) => GrabOutcome::Image(image),
            ScriptedGrab::Failure(failure) => GrabOutcome::Failed(failure),
        };

        let buffer_id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.outstanding.insert(buffer_id);
        Ok(GrabResult::new(buffer_id, outcome))
    }

    fn release_result(&mut self, result: GrabResult) {
        self.log.record(DeviceEvent::Release(result.buffer_id()));
        if !self.outstanding.remove(&result.buffer_id()) {
            tracing::warn!(buffer_id = result.buffer_id(), "released unknown buffer");
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.log.record(DeviceEvent::Close);
        self.grabbing = None;
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_default() -> (SimulatedTransport, SimulatedDevice) {
        let mut transport = SimulatedTransport::new();
        let devices = transport.enumerate().unwrap();
        let device = transport.open(&devices[0]).unwrap();
        (transport, device)
    }

    #[test]
    fn test_scripted_discovery() {
        let mut transport = SimulatedTransport::new()
            .fail_discoveries(1)
            .empty_discoveries(1);

        assert!(matches!(
            transport.enumerate(),
            Err(TransportError::Enumeration(_))
        ));
        assert!(transport.enumerate().unwrap().is_empty());
        assert_eq!(transport.enumerate().unwrap().len(), 1);
        assert_eq!(transport.log().count(|e| *e == DeviceEvent::Enumerate), 3);
    }

    #[test]
    fn test_noise_follows_pixel_format() {
        let (_transport, mut device) = open_default();
        device.apply(&Setting::PixelFormat(PixelFormat::Rgb8Packed)).unwrap();
        device.start_grabbing(GrabStrategy::OneByOne).unwrap();

        let result = device.retrieve_result(Duration::from_millis(10)).unwrap();
        assert!(result.succeeded());
        match result.outcome() {
            GrabOutcome::Image(raw) => {
                assert_eq!(raw.pixel_format, PixelFormat::Rgb8Packed);
                assert_eq!(raw.data.len(), 64 * 48 * 3);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        device.release_result(result);
        assert_eq!(device.outstanding_buffers(), 0);
    }

    fn first_noise(transport: &mut SimulatedTransport) -> RawImage {
        let devices = transport.enumerate().unwrap();
        let mut device = transport.open(&devices[0]).unwrap();
        device.start_grabbing(GrabStrategy::OneByOne).unwrap();
        let result = device.retrieve_result(Duration::ZERO).unwrap();
        let image = match result.outcome() {
            GrabOutcome::Image(raw) => raw.clone(),
            other => panic!("unexpected outcome {:?}", other),
        };
        device.release_result(result);
        image
    }

    #[test]
    fn test_noise_resolution() {
        let mut transport = SimulatedTransport::new().with_resolution(5, 3);
        let image = first_noise(&mut transport);

        assert_eq!((image.width, image.height), (5, 3));
        assert_eq!(image.data.len(), 15);
    }

    #[test]
    fn test_seed_determines_noise() {
        let a = first_noise(&mut SimulatedTransport::new().with_seed(7));
        let b = first_noise(&mut SimulatedTransport::new().with_seed(7));
        let c = first_noise(&mut SimulatedTransport::new().with_seed(8));

        assert_eq!(a.data, b.data);
        assert_ne!(a.data, c.data);
    }

    #[test]
    fn test_unreleased_buffers_exhaust_pool() {
        let (_transport, mut device) = open_default();
        device.apply(&Setting::MaxNumBuffer(2)).unwrap();
        device.start_grabbing(GrabStrategy::LatestImageOnly).unwrap();

        let _a = device.retrieve_result(Duration::ZERO).unwrap();
        let _b = device.retrieve_result(Duration::ZERO).unwrap();
        assert!(matches!(
            device.retrieve_result(Duration::ZERO),
            Err(TransportError::Acquisition(_))
        ));
    }

    #[test]
    fn test_rejected_node() {
        let mut transport = SimulatedTransport::new().reject_setting("Gain");
        let devices = transport.enumerate().unwrap();
        let mut device = transport.open(&devices[0]).unwrap();

        assert!(matches!(
            device.apply(&Setting::Gain(40.0)),
            Err(TransportError::Parameter { node: "Gain", .. })
        ));
        assert!(device.apply(&Setting::ExposureTime(100)).is_ok());
    }

    #[test]
    fn test_close_stops_acquisition() {
        let (transport, mut device) = open_default();
        device.start_grabbing(GrabStrategy::LatestImageOnly).unwrap();
        assert_eq!(device.grab_strategy(), Some(GrabStrategy::LatestImageOnly));
        device.close().unwrap();

        assert!(!device.is_open());
        assert!(!device.is_grabbing());
        assert_eq!(device.grab_strategy(), None);
        assert_eq!(transport.log().events().last(), Some(&DeviceEvent::Close));
    }
}
