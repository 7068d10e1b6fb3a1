//! Native camera backend built on `nokhwa`.
//!
//! UVC-class cameras expose far fewer controls than a GenICam device.
//! Gain and exposure map onto camera controls; nodes without an
//! equivalent are logged and skipped. Frames are always decoded to RGB8.
//!
//! The `nokhwa` camera lives on its own thread because its frame call
//! blocks without a deadline. Every device call is a request to that
//! thread, and [`Device::retrieve_result`] stops waiting once its timeout
//! has elapsed.

use super::worker::{Replies, Requests, Worker};
use super::{
    Device, DeviceDescriptor, DeviceTransport, GrabFailure, GrabOutcome, GrabResult, GrabStrategy,
    Setting, TransportError,
};
use crate::capture::{PixelFormat, RawImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraIndex, CameraInfo, ControlValueSetter, KnownCameraControl, RequestedFormat,
    RequestedFormatType,
};
use nokhwa::Camera;
use std::time::Duration;

/// Grab failure code for frames that could not be decoded.
const DECODE_FAILED: u32 = 1;

/// Deadline for open, control and stream calls.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

enum Command {
    Open(CameraIndex),
    Control(KnownCameraControl, ControlValueSetter),
    StartStream,
    StopStream,
    Frame,
    Close,
}

enum Reply {
    Done(Result<(), String>),
    Frame(Result<GrabOutcome, String>),
}

/// Owns the `nokhwa` camera for the lifetime of the device.
fn serve(requests: Requests<Command>, replies: Replies<Reply>) {
    let mut camera: Option<Camera> = None;

    for (id, command) in requests {
        let reply = match command {
            Command::Open(index) => {
                let format =
                    RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
                Reply::Done(match Camera::new(index, format) {
                    Ok(opened) => {
                        camera = Some(opened);
                        Ok(())
                    }
                    Err(e) => Err(e.to_string()),
                })
            }
            Command::Close => {
                let stopped = match camera.as_mut() {
                    Some(camera) if camera.is_stream_open() => {
                        camera.stop_stream().map_err(|e| e.to_string())
                    }
                    _ => Ok(()),
                };
                let _ = replies.send((id, Reply::Done(stopped)));
                break;
            }
            other => match camera.as_mut() {
                Some(camera) => execute(camera, other),
                None if matches!(other, Command::Frame) => {
                    Reply::Frame(Err("camera is not open".into()))
                }
                None => Reply::Done(Err("camera is not open".into())),
            },
        };
        if replies.send((id, reply)).is_err() {
            break;
        }
    }
}

fn execute(camera: &mut Camera, command: Command) -> Reply {
    match command {
        Command::Control(control, value) => {
            Reply::Done(camera.set_camera_control(control, value).map_err(|e| e.to_string()))
        }
        Command::StartStream => Reply::Done(camera.open_stream().map_err(|e| e.to_string())),
        Command::StopStream => Reply::Done(camera.stop_stream().map_err(|e| e.to_string())),
        Command::Frame => Reply::Frame(grab(camera)),
        Command::Open(_) | Command::Close => Reply::Done(Err("unexpected camera command".into())),
    }
}

fn grab(camera: &mut Camera) -> Result<GrabOutcome, String> {
    let buffer = camera.frame().map_err(|e| e.to_string())?;
    Ok(match buffer.decode_image::<RgbFormat>() {
        Ok(decoded) => {
            let (width, height) = (decoded.width(), decoded.height());
            GrabOutcome::Image(RawImage::new(
                width,
                height,
                PixelFormat::Rgb8Packed,
                decoded.into_raw(),
            ))
        }
        Err(e) => GrabOutcome::Failed(GrabFailure::new(DECODE_FAILED, e.to_string())),
    })
}

/// Transport over the platform's native camera API.
#[derive(Default)]
pub struct NativeTransport {
    discovered: Vec<CameraInfo>,
}

impl NativeTransport {
    /// Creates a transport; devices are queried on [`DeviceTransport::enumerate`].
    pub fn new() -> Self {
        Self::default()
    }
}

fn descriptor_for(info: &CameraInfo) -> DeviceDescriptor {
    DeviceDescriptor::new(info.human_name(), info.index().to_string())
}

impl DeviceTransport for NativeTransport {
    type Device = NativeDevice;

    fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.discovered = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| TransportError::Enumeration(e.to_string()))?;
        Ok(self.discovered.iter().map(descriptor_for).collect())
    }

    fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<NativeDevice, TransportError> {
        let index: CameraIndex = self
            .discovered
            .iter()
            .find(|info| info.index().to_string() == descriptor.serial_number())
            .map(|info| info.index().clone())
            .ok_or_else(|| TransportError::Open(format!("{} is no longer attached", descriptor)))?;

        let mut worker =
            Worker::spawn("nokhwa-camera", serve).map_err(|e| TransportError::Open(e.to_string()))?;
        match worker.request(Command::Open(index), CONTROL_TIMEOUT) {
            Ok(Reply::Done(Ok(()))) => {}
            Ok(Reply::Done(Err(reason))) => return Err(TransportError::Open(reason)),
            Ok(Reply::Frame(_)) => return Err(unexpected_reply()),
            Err(e) => return Err(TransportError::Open(e.to_string())),
        }

        Ok(NativeDevice {
            descriptor: descriptor.clone(),
            worker,
            grabbing: false,
            next_buffer_id: 1,
        })
    }
}

fn unexpected_reply() -> TransportError {
    TransportError::Acquisition("unexpected reply from camera thread".into())
}

/// Opened native camera.
pub struct NativeDevice {
    descriptor: DeviceDescriptor,
    worker: Worker<Command, Reply>,
    grabbing: bool,
    next_buffer_id: u64,
}

impl NativeDevice {
    fn call(
        &mut self,
        command: Command,
        map_err: impl FnOnce(String) -> TransportError,
    ) -> Result<(), TransportError> {
        match self.worker.request(command, CONTROL_TIMEOUT)? {
            Reply::Done(result) => result.map_err(map_err),
            Reply::Frame(_) => Err(unexpected_reply()),
        }
    }

    fn set_control(
        &mut self,
        node: &'static str,
        control: KnownCameraControl,
        value: ControlValueSetter,
    ) -> Result<(), TransportError> {
        self.call(Command::Control(control, value), |reason| TransportError::Parameter {
            node,
            reason,
        })
    }
}

impl Device for NativeDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn is_open(&self) -> bool {
        self.worker.is_running()
    }

    fn apply(&mut self, setting: &Setting) -> Result<(), TransportError> {
        match setting {
            Setting::Gain(gain) => self.set_control(
                setting.node(),
                KnownCameraControl::Gain,
                ControlValueSetter::Integer(gain.round() as i64),
            ),
            Setting::ExposureTime(us) => self.set_control(
                setting.node(),
                KnownCameraControl::Exposure,
                ControlValueSetter::Integer(i64::from(*us)),
            ),
            other => {
                if !self.is_open() {
                    return Err(TransportError::NotOpen);
                }
                tracing::debug!(setting = %other, "Setting has no native equivalent, skipped");
                Ok(())
            }
        }
    }

    fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    fn start_grabbing(&mut self, strategy: GrabStrategy) -> Result<(), TransportError> {
        tracing::debug!(?strategy, "Opening native stream");
        self.call(Command::StartStream, TransportError::Acquisition)?;
        self.grabbing = true;
        Ok(())
    }

    fn stop_grabbing(&mut self) -> Result<(), TransportError> {
        self.call(Command::StopStream, TransportError::Acquisition)?;
        self.grabbing = false;
        Ok(())
    }

    fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult, TransportError> {
        let outcome = match self.worker.request(Command::Frame, timeout)? {
            Reply::Frame(result) => result.map_err(TransportError::Acquisition)?,
            Reply::Done(_) => return Err(unexpected_reply()),
        };

        let buffer_id = self.next_buffer_id;
        self.next_buffer_id += 1;
        Ok(GrabResult::new(buffer_id, outcome))
    }

    fn release_result(&mut self, result: GrabResult) {
        tracing::trace!(buffer_id = result.buffer_id(), "Released native frame");
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.worker.is_running() {
            return Ok(());
        }
        self.grabbing = false;
        // The thread is shut down even if it never answers.
        let result = self.call(Command::Close, TransportError::Close);
        self.worker.shutdown();
        result
    }
}
