//! Camera session lifecycle.
//!
//! A session is created connected and configured or not at all. It
//! owns the device handle exclusively and closes it when dropped, so
//! every exit path releases the camera.
//!
//! All methods take `&mut self`; a session has a single owner and no
//! internal locking.

use super::{
    ConnectFailure, SessionError, SessionOptions, SessionState, SessionStats, CAPTURE_TIMEOUT,
};
use crate::capture::{CameraConfig, Frame, ImageConverter};
use crate::transport::{
    AutoMode, Device, DeviceDescriptor, DeviceTransport, GrabFailure, GrabOutcome, GrabStrategy,
    Setting, TransportError,
};
use std::fmt;
use std::thread;

/// Parameter writes for a configuration, in the order they are applied.
///
/// Gain first, then manual white balance (auto off, then a selector and
/// ratio write per channel), pixel format, manual exposure and finally
/// the buffer count.
pub fn configuration_sequence(config: &CameraConfig) -> Vec<Setting> {
    let mut settings = Vec::with_capacity(7 + 2 * config.balance_ratios.len());
    settings.push(Setting::Gain(config.gain));
    settings.push(Setting::BalanceWhiteAuto(AutoMode::Off));
    for (channel, ratio) in config.balance_ratios.iter() {
        settings.push(Setting::BalanceRatioSelector(channel));
        settings.push(Setting::BalanceRatio(ratio));
    }
    settings.push(Setting::PixelFormat(config.pixel_format.clone()));
    settings.push(Setting::ExposureAuto(AutoMode::Off));
    settings.push(Setting::ExposureTime(config.exposure_time));
    settings.push(Setting::MaxNumBuffer(config.max_buffers));
    settings
}

/// An open, configured camera.
pub struct CameraSession<D: Device> {
    state: SessionState,
    device: Option<D>,
    config: CameraConfig,
    converter: ImageConverter,
    frame: Option<Frame>,
    last_grab_failure: Option<GrabFailure>,
    stats: SessionStats,
}

impl<D: Device> CameraSession<D> {
    fn new(config: CameraConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            device: None,
            config,
            converter: ImageConverter::new(),
            frame: None,
            last_grab_failure: None,
            stats: SessionStats::default(),
        }
    }

    /// Connects to the first discovered camera and configures it.
    ///
    /// Discovery and open failures are retried up to
    /// `options.max_retries` times with a fixed `options.retry_delay`
    /// between attempts. A configuration failure is returned immediately
    /// and the device is closed on the way out. When `config` is `None`
    /// the default configuration is applied.
    pub fn connect<T>(
        transport: &mut T,
        config: Option<CameraConfig>,
        options: &SessionOptions,
    ) -> Result<Self, SessionError>
    where
        T: DeviceTransport<Device = D>,
    {
        let mut session = Self::new(config.unwrap_or_default());
        session.establish(transport, options)?;
        session.configure()?;
        Ok(session)
    }

    fn establish<T>(&mut self, transport: &mut T, options: &SessionOptions) -> Result<(), SessionError>
    where
        T: DeviceTransport<Device = D>,
    {
        let max_attempts = options.max_attempts();
        self.state = SessionState::Connecting;

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.stats.connect_attempts = attempt;

            match open_first_device(transport) {
                Ok(device) => {
                    self.device = Some(device);
                    self.state = SessionState::Connected;
                    return Ok(());
                }
                Err(failure) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %failure,
                        "Camera connection attempt failed"
                    );
                    if attempt >= max_attempts {
                        self.state = SessionState::Disconnected;
                        return Err(SessionError::ConnectExhausted {
                            attempts: attempt,
                            last: failure,
                        });
                    }
                    if !options.retry_delay.is_zero() {
                        thread::sleep(options.retry_delay);
                    }
                }
            }
        }
    }

    fn configure(&mut self) -> Result<(), SessionError> {
        let settings = configuration_sequence(&self.config);
        let device = self.device.as_mut().ok_or(SessionError::NotConnected { state: self.state })?;

        for setting in &settings {
            tracing::debug!(%setting, "Applying camera setting");
            device
                .apply(setting)
                .map_err(|source| SessionError::Configure {
                    setting: setting.node(),
                    source,
                })?;
        }

        tracing::info!(exposure_us = self.config.exposure_time, "Exposure time set");
        Ok(())
    }

    /// True while the device is acquiring. False without a device.
    pub fn is_grabbing(&self) -> bool {
        self.device.as_ref().is_some_and(|device| device.is_grabbing())
    }

    /// Captures one frame.
    ///
    /// Starts latest-image-only acquisition on first use, then waits up
    /// to [`CAPTURE_TIMEOUT`] for a result. Returns `Ok(None)` when the
    /// device reports a failed grab; the session keeps grabbing and the
    /// previously stored frame is kept. Every retrieved result is
    /// released before returning.
    pub fn capture(&mut self) -> Result<Option<&Frame>, SessionError> {
        if !matches!(self.state, SessionState::Connected | SessionState::Grabbing) {
            return Err(SessionError::NotConnected { state: self.state });
        }
        let device = self
            .device
            .as_mut()
            .ok_or(SessionError::NotConnected { state: self.state })?;

        if !device.is_grabbing() {
            device
                .start_grabbing(GrabStrategy::LatestImageOnly)
                .map_err(SessionError::Transport)?;
            tracing::debug!("Started grabbing with latest-image-only strategy");
        }
        self.state = SessionState::Grabbing;

        let result = match device.retrieve_result(CAPTURE_TIMEOUT) {
            Ok(result) => result,
            Err(TransportError::Timeout(timeout)) => {
                self.stats.capture_timeouts += 1;
                return Err(SessionError::CaptureTimeout { timeout });
            }
            Err(e) => return Err(SessionError::Transport(e)),
        };

        let sequence = self.stats.frames_captured + 1;
        let buffer_id = result.buffer_id();
        let decoded = match result.outcome() {
            GrabOutcome::Image(raw) => Ok(device.convert(raw, &self.converter, sequence)),
            GrabOutcome::Failed(failure) => Err(failure.clone()),
        };
        device.release_result(result);

        match decoded {
            Ok(Ok(frame)) => {
                let frame = frame.with_buffer_id(buffer_id);
                tracing::info!(
                    sequence,
                    shape = ?frame.shape(),
                    dtype = frame.element_type(),
                    "Captured image"
                );
                self.stats.frames_captured = sequence;
                self.frame = Some(frame);
                Ok(self.frame.as_ref())
            }
            Ok(Err(e)) => Err(SessionError::Conversion(e)),
            Err(failure) => {
                tracing::warn!(
                    code = failure.code,
                    description = %failure.description,
                    "Error capturing image"
                );
                self.stats.grab_failures += 1;
                self.last_grab_failure = Some(failure);
                Ok(None)
            }
        }
    }

    /// Stops acquisition, returning to `Connected`.
    pub fn stop_grabbing(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Grabbing {
            return Ok(());
        }
        if let Some(device) = self.device.as_mut() {
            device.stop_grabbing().map_err(SessionError::Transport)?;
        }
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Releases the camera. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            if device.is_grabbing() {
                if let Err(e) = device.stop_grabbing() {
                    tracing::warn!(error = %e, "Failed to stop grabbing");
                }
            }
            if device.is_open() {
                if let Err(e) = device.close() {
                    tracing::warn!(error = %e, "Failed to close camera");
                }
            }
            tracing::info!("Camera resources released");
        }
        self.state = SessionState::Closed;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Descriptor of the open device.
    pub fn descriptor(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref().map(|device| device.descriptor())
    }

    /// The open device, if any.
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Configuration applied after connecting.
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Most recently captured frame.
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Most recent grab failure reported by the device.
    pub fn last_grab_failure(&self) -> Option<&GrabFailure> {
        self.last_grab_failure.as_ref()
    }

    /// Counters since construction.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}

fn open_first_device<T: DeviceTransport>(transport: &mut T) -> Result<T::Device, ConnectFailure> {
    let devices = transport.enumerate()?;
    let first = devices.first().ok_or(ConnectFailure::NoDevices)?;

    for device in &devices {
        tracing::info!(
            model = device.model_name(),
            address = device.address().unwrap_or("-"),
            serial = device.serial_number(),
            "Discovered camera"
        );
    }

    let device = transport.open(first)?;
    tracing::info!(
        model = device.descriptor().model_name(),
        address = device.descriptor().address().unwrap_or("-"),
        "Connected to camera"
    );
    Ok(device)
}

impl<D: Device> Drop for CameraSession<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: Device> fmt::Debug for CameraSession<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSession")
            .field("state", &self.state)
            .field("device", &self.descriptor())
            .field("config", &self.config)
            .field("frame", &self.frame)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{BalanceChannel, PixelFormat, RawImage};
    use crate::transport::{
        DeviceEvent, ScriptedGrab, SimulatedDevice, SimulatedTransport,
    };
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    type Session = CameraSession<SimulatedDevice>;

    fn no_delay(max_retries: u32) -> SessionOptions {
        SessionOptions::new(max_retries, Duration::ZERO)
    }

    fn is_open_call(event: &DeviceEvent) -> bool {
        matches!(event, DeviceEvent::Open(_))
    }

    fn connect(transport: &mut SimulatedTransport) -> Session {
        CameraSession::connect(transport, None, &no_delay(1)).unwrap()
    }

    #[test]
    fn test_connect_succeeds_on_third_attempt() {
        let mut transport = SimulatedTransport::new().fail_opens(2);
        let log = transport.log();

        let session = CameraSession::connect(&mut transport, None, &no_delay(3)).unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.stats().connect_attempts, 3);
        assert_eq!(log.count(is_open_call), 3);
        assert!(!session.is_grabbing());
    }

    #[test]
    fn test_connect_exhausted_after_two_attempts() {
        let mut transport = SimulatedTransport::new().fail_opens(2);
        let log = transport.log();

        let err = Session::connect(&mut transport, None, &no_delay(2)).unwrap_err();

        assert!(matches!(
            err,
            SessionError::ConnectExhausted {
                attempts: 2,
                last: ConnectFailure::Transport(TransportError::Open(_)),
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(log.count(is_open_call), 2);
        assert_eq!(log.count(|e| matches!(e, DeviceEvent::Apply(_))), 0);
    }

    #[test]
    fn test_empty_discovery_is_retried() {
        let mut transport = SimulatedTransport::new().empty_discoveries(2);
        let log = transport.log();

        let session = Session::connect(&mut transport, None, &no_delay(5)).unwrap();

        assert_eq!(session.stats().connect_attempts, 3);
        assert_eq!(log.count(|e| *e == DeviceEvent::Enumerate), 3);
        assert_eq!(log.count(is_open_call), 1);
    }

    #[test]
    fn test_no_devices_exhausts() {
        let mut transport = SimulatedTransport::without_devices();
        let err = Session::connect(&mut transport, None, &no_delay(3)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ConnectExhausted {
                attempts: 3,
                last: ConnectFailure::NoDevices,
            }
        ));
    }

    #[test]
    fn test_discovery_error_is_retried() {
        let mut transport = SimulatedTransport::new().fail_discoveries(1);
        let session = Session::connect(&mut transport, None, &no_delay(2)).unwrap();
        assert_eq!(session.stats().connect_attempts, 2);
    }

    #[test]
    fn test_retry_delay_between_attempts() {
        let delay = Duration::from_millis(20);
        let mut transport = SimulatedTransport::new().fail_opens(u32::MAX);

        let start = Instant::now();
        let result = Session::connect(&mut transport, None, &SessionOptions::new(3, delay));

        assert!(result.is_err());
        assert!(start.elapsed() >= delay * 2);
    }

    #[test]
    fn test_opens_first_enumerated_device() {
        let mut transport = SimulatedTransport::with_devices(vec![
            DeviceDescriptor::new("acA1300-200uc", "A1"),
            DeviceDescriptor::new("acA2440-20gm", "B2").with_address("10.1.1.5"),
        ]);
        let log = transport.log();

        let session = connect(&mut transport);

        assert_eq!(session.descriptor().map(|d| d.serial_number()), Some("A1"));
        assert_eq!(log.count(|e| *e == DeviceEvent::Open("A1".into())), 1);
    }

    #[test]
    fn test_default_configuration_order() {
        let mut transport = SimulatedTransport::new();
        let log = transport.log();

        let session = connect(&mut transport);

        assert_eq!(session.config(), &CameraConfig::default());
        assert_eq!(
            log.applied_settings(),
            vec![
                Setting::Gain(10.0),
                Setting::BalanceWhiteAuto(AutoMode::Off),
                Setting::BalanceRatioSelector(BalanceChannel::Red),
                Setting::BalanceRatio(1.5),
                Setting::BalanceRatioSelector(BalanceChannel::Green),
                Setting::BalanceRatio(1.0),
                Setting::BalanceRatioSelector(BalanceChannel::Blue),
                Setting::BalanceRatio(1.0),
                Setting::PixelFormat(PixelFormat::BayerRG8),
                Setting::ExposureAuto(AutoMode::Off),
                Setting::ExposureTime(10000),
                Setting::MaxNumBuffer(5),
            ]
        );
    }

    #[test]
    fn test_balance_ratios_follow_insertion_order() {
        let mut config = CameraConfig::default();
        config.balance_ratios = [(BalanceChannel::Blue, 1.2), (BalanceChannel::Red, 1.7)]
            .into_iter()
            .collect();

        let selectors: Vec<_> = configuration_sequence(&config)
            .into_iter()
            .filter(|s| matches!(s, Setting::BalanceRatioSelector(_)))
            .collect();

        assert_eq!(
            selectors,
            vec![
                Setting::BalanceRatioSelector(BalanceChannel::Blue),
                Setting::BalanceRatioSelector(BalanceChannel::Red),
            ]
        );
    }

    #[test]
    fn test_configure_failure_stops_and_is_not_retried() {
        let mut transport = SimulatedTransport::new().reject_setting("PixelFormat");
        let log = transport.log();

        let err = Session::connect(&mut transport, None, &no_delay(5)).unwrap_err();

        assert!(matches!(
            err,
            SessionError::Configure {
                setting: "PixelFormat",
                source: TransportError::Parameter { .. },
            }
        ));
        assert_eq!(log.count(is_open_call), 1);

        let applied = log.applied_settings();
        assert_eq!(applied.last(), Some(&Setting::PixelFormat(PixelFormat::BayerRG8)));
        assert!(!applied.iter().any(|s| matches!(
            s,
            Setting::ExposureAuto(_) | Setting::ExposureTime(_) | Setting::MaxNumBuffer(_)
        )));

        // Teardown closes the half-configured device.
        assert_eq!(log.events().last(), Some(&DeviceEvent::Close));
    }

    #[test]
    fn test_first_capture_starts_grabbing() {
        let mut transport = SimulatedTransport::new();
        let log = transport.log();
        let mut session = connect(&mut transport);

        let frame = session.capture().unwrap().cloned();

        assert!(session.is_grabbing());
        assert_eq!(session.state(), SessionState::Grabbing);
        assert_eq!(
            log.count(|e| *e == DeviceEvent::StartGrabbing(GrabStrategy::LatestImageOnly)),
            1
        );
        assert_eq!(
            session.device().and_then(|device| device.grab_strategy()),
            Some(GrabStrategy::LatestImageOnly)
        );
        let frame = frame.unwrap();
        assert_eq!(frame.shape(), (48, 64, 3));
        assert!(frame.is_valid());
        assert_eq!(frame.sequence(), 1);
    }

    #[test]
    fn test_consecutive_captures_start_grabbing_once() {
        let mut transport = SimulatedTransport::new();
        let log = transport.log();
        let mut session = connect(&mut transport);

        assert!(session.capture().unwrap().is_some());
        assert!(session.is_grabbing());
        assert!(session.capture().unwrap().is_some());
        assert!(session.is_grabbing());

        assert_eq!(log.count(|e| matches!(e, DeviceEvent::StartGrabbing(_))), 1);
        assert_eq!(session.current_frame().map(|f| f.sequence()), Some(2));
    }

    #[test]
    fn test_grab_failure_returns_no_frame() {
        let mut transport = SimulatedTransport::new();
        let script = transport.script();
        let log = transport.log();
        let mut session = connect(&mut transport);

        session.capture().unwrap();
        let before = session.current_frame().cloned().unwrap();

        script.push(ScriptedGrab::Failure(GrabFailure::new(0xE1000014, "Buffer incompletely grabbed")));
        assert!(session.capture().unwrap().is_none());

        assert!(session.is_grabbing());
        let after = session.current_frame().unwrap();
        assert_eq!(after.sequence(), before.sequence());
        assert_eq!(after.pixels(), before.pixels());
        assert_eq!(session.last_grab_failure().map(|f| f.code), Some(0xE1000014));
        assert_eq!(session.stats().grab_failures, 1);

        assert_eq!(log.count(|e| matches!(e, DeviceEvent::Release(_))), 2);
    }

    #[test]
    fn test_results_released_exactly_once() {
        let mut transport = SimulatedTransport::new();
        let script = transport.script();
        let log = transport.log();
        let mut session = connect(&mut transport);

        script
            .push(ScriptedGrab::Noise)
            .push(ScriptedGrab::Failure(GrabFailure::new(3, "lost packets")))
            .push(ScriptedGrab::Noise);
        for _ in 0..3 {
            session.capture().unwrap();
        }

        let released: Vec<u64> = log
            .events()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Release(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(released, vec![1, 2, 3]);
        assert_eq!(session.device().map(|d| d.outstanding_buffers()), Some(0));
    }

    #[test]
    fn test_capture_timeout_keeps_frame() {
        let mut transport = SimulatedTransport::new();
        let script = transport.script();
        let log = transport.log();
        let mut session = connect(&mut transport);

        session.capture().unwrap();
        script.push(ScriptedGrab::Timeout);

        let err = session.capture().unwrap_err();

        assert!(matches!(
            err,
            SessionError::CaptureTimeout { timeout } if timeout == CAPTURE_TIMEOUT
        ));
        assert!(!err.is_fatal());
        assert_eq!(session.current_frame().map(|f| f.sequence()), Some(1));
        assert_eq!(session.state(), SessionState::Grabbing);
        assert_eq!(session.stats().capture_timeouts, 1);
        assert_eq!(log.count(|e| matches!(e, DeviceEvent::Release(_))), 1);

        // The session recovers on the next grab.
        assert!(session.capture().unwrap().is_some());
    }

    #[test]
    fn test_conversion_failure_still_releases() {
        let mut transport = SimulatedTransport::new();
        let script = transport.script();
        let log = transport.log();
        let mut session = connect(&mut transport);

        script.push(ScriptedGrab::Image(RawImage::new(
            2,
            2,
            PixelFormat::Other("Mono12p".into()),
            vec![0; 6],
        )));

        assert!(matches!(
            session.capture(),
            Err(SessionError::Conversion(TransportError::Convert(_)))
        ));
        assert!(session.current_frame().is_none());
        assert_eq!(log.count(|e| matches!(e, DeviceEvent::Release(_))), 1);
    }

    #[test]
    fn test_supplied_configuration_is_applied() {
        let mut transport = SimulatedTransport::new();
        let log = transport.log();
        let config = CameraConfig {
            pixel_format: PixelFormat::Mono8,
            ..CameraConfig::with_exposure(2500)
        };

        let mut session = Session::connect(&mut transport, Some(config), &no_delay(1)).unwrap();

        assert!(log
            .applied_settings()
            .contains(&Setting::ExposureTime(2500)));
        let frame = session.capture().unwrap().unwrap();
        // Mono is replicated across all three channels.
        let [b, g, r] = frame.pixel(0, 0).unwrap();
        assert!(b == g && g == r);
    }

    #[test]
    fn test_stop_grabbing_returns_to_connected() {
        let mut transport = SimulatedTransport::new();
        let mut session = connect(&mut transport);

        session.capture().unwrap();
        session.stop_grabbing().unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert!(!session.is_grabbing());
    }

    #[test]
    fn test_close_when_never_connected() {
        let mut session = Session::new(CameraConfig::default());
        assert!(!session.is_grabbing());

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_close_when_connected() {
        let mut transport = SimulatedTransport::new();
        let log = transport.log();
        let mut session = connect(&mut transport);

        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.device().is_none());
        assert_eq!(log.count(|e| *e == DeviceEvent::Close), 1);
        assert_eq!(log.count(|e| *e == DeviceEvent::StopGrabbing), 0);
    }

    #[test]
    fn test_close_when_grabbing() {
        let mut transport = SimulatedTransport::new();
        let log = transport.log();
        let mut session = connect(&mut transport);
        session.capture().unwrap();

        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_grabbing());
        assert_eq!(log.count(|e| *e == DeviceEvent::StopGrabbing), 1);
        assert_eq!(log.count(|e| *e == DeviceEvent::Close), 1);
    }

    #[test]
    fn test_capture_after_close_fails() {
        let mut transport = SimulatedTransport::new();
        let mut session = connect(&mut transport);
        session.close();

        assert!(matches!(
            session.capture(),
            Err(SessionError::NotConnected {
                state: SessionState::Closed
            })
        ));
    }

    #[test]
    fn test_drop_releases_device() {
        let mut transport = SimulatedTransport::new();
        let log = transport.log();
        {
            let mut session = connect(&mut transport);
            session.capture().unwrap();
        }

        let events = log.events();
        let tail = &events[events.len() - 2..];
        assert_eq!(tail, &[DeviceEvent::StopGrabbing, DeviceEvent::Close]);
    }

    proptest! {
        #[test]
        fn prop_exhausts_after_exactly_max_retries(max_retries in 1u32..16) {
            let mut transport = SimulatedTransport::new().fail_opens(u32::MAX);
            let log = transport.log();

            let result = Session::connect(&mut transport, None, &no_delay(max_retries));

            let exhausted = matches!(
                result,
                Err(SessionError::ConnectExhausted { attempts, .. }) if attempts == max_retries
            );
            prop_assert!(exhausted);
            prop_assert_eq!(log.count(is_open_call), max_retries as usize);
        }

        #[test]
        fn prop_no_attempts_after_success(
            (max_retries, success_at) in (1u32..16).prop_flat_map(|n| (Just(n), 1..=n))
        ) {
            let mut transport = SimulatedTransport::new().fail_opens(success_at - 1);
            let log = transport.log();

            let session = Session::connect(&mut transport, None, &no_delay(max_retries));

            prop_assert!(session.is_ok());
            prop_assert_eq!(log.count(is_open_call), success_at as usize);
            prop_assert_eq!(log.count(|e| *e == DeviceEvent::Enumerate), success_at as usize);
        }
    }
}
