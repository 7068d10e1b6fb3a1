//! Metrics collection and registry.

use crate::session::{CameraSession, SessionStats};
use crate::transport::Device;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Metric creation, registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of session state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Whether the device is currently acquiring.
    pub is_grabbing: bool,
    /// Connection attempts made by the session.
    pub connect_attempts: u64,
    /// Frames decoded and stored.
    pub frames_captured: u64,
    /// Grabs reported as failed by the device.
    pub grab_failures: u64,
    /// Captures that hit the result timeout.
    pub capture_timeouts: u64,
}

impl MetricsSnapshot {
    /// Creates a snapshot from session counters.
    pub fn from_stats(stats: &SessionStats, is_grabbing: bool) -> Self {
        Self {
            is_grabbing,
            connect_attempts: u64::from(stats.connect_attempts),
            frames_captured: stats.frames_captured,
            grab_failures: stats.grab_failures,
            capture_timeouts: stats.capture_timeouts,
        }
    }

    /// Creates a snapshot from the current state of a session.
    pub fn from_session<D: Device>(session: &CameraSession<D>) -> Self {
        Self::from_stats(&session.stats(), session.is_grabbing())
    }
}

/// Prometheus metrics registry for camera sessions.
pub struct MetricsRegistry {
    registry: Registry,
    grabbing: IntGauge,
    connect_attempts_total: IntCounter,
    frames_captured_total: IntCounter,
    grab_failures_total: IntCounter,
    capture_timeouts_total: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new registry with all session metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let grabbing = IntGauge::new(
            "camera_session_grabbing",
            "Whether the camera is acquiring (1=grabbing, 0=idle)",
        )?;
        let connect_attempts_total = IntCounter::new(
            "camera_session_connect_attempts_total",
            "Connection attempts made while opening the camera",
        )?;
        let frames_captured_total = IntCounter::new(
            "camera_session_frames_captured_total",
            "Frames captured and decoded",
        )?;
        let grab_failures_total = IntCounter::new(
            "camera_session_grab_failures_total",
            "Grabs the device reported as failed",
        )?;
        let capture_timeouts_total = IntCounter::new(
            "camera_session_capture_timeouts_total",
            "Captures that timed out waiting for a result",
        )?;

        registry.register(Box::new(grabbing.clone()))?;
        registry.register(Box::new(connect_attempts_total.clone()))?;
        registry.register(Box::new(frames_captured_total.clone()))?;
        registry.register(Box::new(grab_failures_total.clone()))?;
        registry.register(Box::new(capture_timeouts_total.clone()))?;

        Ok(Self {
            registry,
            grabbing,
            connect_attempts_total,
            frames_captured_total,
            grab_failures_total,
            capture_timeouts_total,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.grabbing.set(i64::from(snapshot.is_grabbing));

        // Counters only move forward by the difference
        advance(&self.connect_attempts_total, snapshot.connect_attempts);
        advance(&self.frames_captured_total, snapshot.frames_captured);
        advance(&self.grab_failures_total, snapshot.grab_failures);
        advance(&self.capture_timeouts_total, snapshot.capture_timeouts);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
