//! Configuration parsing for the coaching service.
//!
//! This module owns translation of CLI arguments into a `CoachConfig` which
//! the server and pipeline use without re-parsing flags.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use ml_core::ScoringPolicy;
use video_ingest::{CaptureBackend, CaptureOptions};

pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Capture backend selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Ffmpeg,
    Opencv,
}

impl From<BackendArg> for CaptureBackend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Ffmpeg => CaptureBackend::Ffmpeg,
            BackendArg::Opencv => CaptureBackend::OpenCv,
        }
    }
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every part of the service.
pub struct CoachConfig {
    /// Camera device index, device path, file or URL.
    pub source_uri: String,
    /// JSON reference pose library.
    pub references_path: PathBuf,
    /// ONNX pose model, used when the ORT estimator is compiled in.
    pub model_path: Option<PathBuf>,
    pub capture: CaptureOptions,
    pub jpeg_quality: u8,
    pub host: String,
    pub port: u16,
    /// Where `GET /` sends the browser after stopping the camera.
    pub frontend_url: String,
    pub broadcast_capacity: usize,
    pub policy: ScoringPolicy,
    pub presence_threshold: f32,
    pub verbose: bool,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Args)]
pub struct CoachCliArgs {
    /// Camera index, `/dev/videoN`, video file or stream URL.
    #[arg(long, env = "POSE_COACH_SOURCE", default_value = "0", value_name = "URI")]
    pub source: String,
    /// Reference pose library (JSON).
    #[arg(long, env = "POSE_COACH_REFERENCES", value_name = "PATH")]
    pub references: PathBuf,
    /// ONNX pose landmark model. Requires a build with the `with-ort`
    /// feature; without it frames stream unscored and no feedback is sent.
    #[arg(long, env = "POSE_COACH_MODEL", value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// Capture backend.
    #[arg(long, env = "POSE_COACH_BACKEND", value_enum, default_value_t = BackendArg::Ffmpeg)]
    pub backend: BackendArg,
    /// Capture width in pixels.
    #[arg(long, env = "POSE_COACH_WIDTH", default_value_t = 640, value_name = "PX")]
    pub width: i64,
    /// Capture height in pixels.
    #[arg(long, env = "POSE_COACH_HEIGHT", default_value_t = 480, value_name = "PX")]
    pub height: i64,
    /// JPEG quality for the MJPEG stream (1-100).
    #[arg(long = "jpeg-quality", env = "POSE_COACH_JPEG_QUALITY", default_value_t = 85)]
    pub jpeg_quality: i64,
    /// Address to bind the HTTP server to.
    #[arg(long, env = "POSE_COACH_HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, env = "POSE_COACH_PORT", default_value_t = 5000)]
    pub port: u16,
    /// Frontend the index route redirects to.
    #[arg(long = "frontend-url", env = "POSE_COACH_FRONTEND_URL", default_value = DEFAULT_FRONTEND_URL)]
    pub frontend_url: String,
    /// Feedback events buffered per subscriber before it starts lagging.
    #[arg(
        long = "broadcast-capacity",
        env = "POSE_COACH_BROADCAST_CAPACITY",
        default_value_t = DEFAULT_BROADCAST_CAPACITY
    )]
    pub broadcast_capacity: usize,
    /// Pose name that forces the running best score to 0 (repeatable).
    /// Defaults to `Unknown` and `no_pose`.
    #[arg(
        long = "reset-label",
        env = "POSE_COACH_RESET_LABEL",
        value_delimiter = ',',
        value_name = "NAME"
    )]
    pub reset_labels: Vec<String>,
    /// Minimum pose-presence score for a body to count as detected.
    #[arg(long = "presence-threshold", env = "POSE_COACH_PRESENCE_THRESHOLD", default_value_t = 0.5)]
    pub presence_threshold: f32,
    /// Enable debug logging.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

impl TryFrom<CoachCliArgs> for CoachConfig {
    type Error = anyhow::Error;

    fn try_from(args: CoachCliArgs) -> Result<Self> {
        if args.width <= 0 || args.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }
        let (Ok(width), Ok(height)) = (u32::try_from(args.width), u32::try_from(args.height))
        else {
            bail!("Capture width and height must fit in 32 bits");
        };

        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        if args.broadcast_capacity == 0 {
            bail!("--broadcast-capacity must be at least 1");
        }

        if !(0.0..=1.0).contains(&args.presence_threshold) {
            bail!("--presence-threshold must be between 0 and 1");
        }

        let backend = CaptureBackend::from(args.backend);
        if !backend.is_available() {
            bail!(
                "capture backend `{}` requires building with the `with-{}` feature",
                backend.label(),
                backend.label()
            );
        }

        if cfg!(not(feature = "with-ort")) && args.model.is_some() {
            bail!("--model requires building with the `with-ort` feature");
        }

        let policy = if args.reset_labels.is_empty() {
            ScoringPolicy::default()
        } else {
            ScoringPolicy::new(args.reset_labels)
        };

        Ok(Self {
            source_uri: args.source,
            references_path: args.references,
            model_path: args.model,
            capture: CaptureOptions {
                backend,
                target_size: (width, height),
            },
            jpeg_quality: args.jpeg_quality as u8,
            host: args.host,
            port: args.port,
            frontend_url: args.frontend_url,
            broadcast_capacity: args.broadcast_capacity,
            policy,
            presence_threshold: args.presence_threshold,
            verbose: args.verbose,
        })
    }
}
