//! Camera Session CLI
//!
//! Connects to a camera, captures a number of frames (or runs until
//! Ctrl-C) and optionally writes each frame as a PNG file.

use camera_session::{
    capture::FileConfig,
    metrics::{MetricsRegistry, MetricsSnapshot},
    session::{CameraSession, SessionOptions},
    transport::{DeviceTransport, SimulatedTransport},
};
use clap::{Parser, ValueEnum};
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process simulated camera
    Simulated,
    /// Platform camera API (requires the `camera` feature)
    Native,
}

#[derive(Debug, Parser)]
#[command(name = "camera-session", version, about = "Connect to a camera and capture frames")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Simulated)]
    backend: Backend,

    /// Number of capture calls to make
    #[arg(short = 'n', long)]
    frames: Option<u32>,

    /// Capture until interrupted
    #[arg(long)]
    continuous: bool,

    /// Write captured frames as PNG files into this directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Connection attempts before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// Seconds to wait between connection attempts
    #[arg(long)]
    retry_delay: Option<f64>,

    /// Exposure time in microseconds
    #[arg(long)]
    exposure: Option<u32>,

    #[arg(long)]
    gain: Option<f64>,

    /// Fail this many connection attempts first (simulated backend)
    #[arg(long, default_value_t = 0)]
    simulate_connect_failures: u32,

    /// Metrics server port, 0 to disable (requires the `metrics` feature)
    #[arg(long)]
    metrics_port: Option<u16>,
}

impl Args {
    fn merge_into(&self, config: &mut FileConfig) {
        if let Some(frames) = self.frames {
            config.output.frame_count = frames;
        }
        if self.continuous {
            config.output.continuous = true;
        }
        if let Some(dir) = &self.output_dir {
            config.output.output_dir = Some(dir.clone());
        }
        if let Some(port) = self.metrics_port {
            config.output.metrics_port = port;
        }
        if let Some(max_retries) = self.max_retries {
            config.session.max_retries = max_retries;
        }
        if let Some(delay) = self.retry_delay {
            config.session.retry_delay_secs = delay;
        }
        if let Some(exposure) = self.exposure {
            config.camera.exposure_time = exposure;
        }
        if let Some(gain) = self.gain {
            config.camera.gain = gain;
        }
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("Camera Session v{}", camera_session::VERSION);

    let mut config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => FileConfig::default(),
    };
    args.merge_into(&mut config);

    if let Err(e) = config.camera.validate().and_then(|_| config.session.validate()) {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let result = match args.backend {
        Backend::Simulated => {
            info!("Using simulated camera");
            let mut transport = SimulatedTransport::new().fail_opens(args.simulate_connect_failures);
            run(&mut transport, &config, &stop)
        }
        Backend::Native => run_native(&config, &stop),
    };

    if let Err(e) = result {
        eprintln!("Camera session failed: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        std::process::exit(1);
    }
}

#[cfg(feature = "camera")]
fn run_native(config: &FileConfig, stop: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let mut transport = camera_session::transport::NativeTransport::new();
    run(&mut transport, config, stop)
}

#[cfg(not(feature = "camera"))]
fn run_native(_config: &FileConfig, _stop: &AtomicBool) -> Result<(), Box<dyn Error>> {
    Err("this build has no native camera support (enable the `camera` feature)".into())
}

fn run<T: DeviceTransport>(
    transport: &mut T,
    config: &FileConfig,
    stop: &AtomicBool,
) -> Result<(), Box<dyn Error>> {
    let publisher = start_publisher(config.output.metrics_port)?;
    let options = SessionOptions::from(&config.session);

    let mut session = CameraSession::connect(transport, Some(config.camera.clone()), &options)?;
    publisher.publish(MetricsSnapshot::from_session(&session));

    if let Some(dir) = &config.output.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut calls = 0u32;
    let mut captured = 0u32;
    while !stop.load(Ordering::SeqCst) && (config.output.continuous || calls < config.output.frame_count) {
        calls += 1;
        // A capture timeout ends the run; failed grabs do not.
        if let Some(frame) = session.capture()? {
            captured += 1;
            if let Some(dir) = &config.output.output_dir {
                let path = dir.join(format!("frame_{:06}.png", frame.sequence()));
                frame.save_png(&path)?;
                debug!(path = %path.display(), "Saved frame");
            }
        }
        publisher.publish(MetricsSnapshot::from_session(&session));
    }

    info!(
        calls,
        captured,
        grab_failures = session.stats().grab_failures,
        "Capture finished"
    );

    session.close();
    publisher.publish(MetricsSnapshot::from_session(&session));
    publisher.finish();
    Ok(())
}

/// Where session snapshots go: a local registry or the HTTP exporter.
enum Publisher {
    Local(MetricsRegistry),
    #[cfg(feature = "metrics")]
    Served {
        _runtime: tokio::runtime::Runtime,
        state: Arc<tokio::sync::RwLock<camera_session::metrics::MetricsState>>,
    },
}

impl Publisher {
    fn publish(&self, snapshot: MetricsSnapshot) {
        match self {
            Publisher::Local(registry) => registry.update(&snapshot),
            #[cfg(feature = "metrics")]
            Publisher::Served { state, .. } => state.blocking_write().update(snapshot),
        }
    }

    fn finish(&self) {
        if let Publisher::Local(registry) = self {
            match registry.encode() {
                Ok(text) => debug!("Final metrics:\n{}", text),
                Err(e) => warn!("Failed to encode metrics: {}", e),
            }
        }
    }
}

#[cfg(feature = "metrics")]
fn start_publisher(port: u16) -> Result<Publisher, Box<dyn Error>> {
    use camera_session::metrics::{MetricsServer, MetricsServerConfig};

    let registry = MetricsRegistry::new()?;
    if port == 0 {
        return Ok(Publisher::Local(registry));
    }

    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });

    Ok(Publisher::Served {
        _runtime: runtime,
        state,
    })
}

#[cfg(not(feature = "metrics"))]
fn start_publisher(_port: u16) -> Result<Publisher, Box<dyn Error>> {
    Ok(Publisher::Local(MetricsRegistry::new()?))
}
