//! Live pose coaching service: capture frames, score the detected pose
//! against the reference library, stream annotated MJPEG and push feedback to
//! WebSocket subscribers.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `service`: Startup wiring.
//! - `camera`: Single shared capture device with generation-tagged leases.
//! - `pipeline`: Pull-driven read, score, annotate and encode loop.
//! - `annotation`: Skeleton and feedback overlay, JPEG encoding.
//! - `broadcast`: Feedback fan-out and the WebSocket wire format.
//! - `coordinator`: Subscriber count driving camera teardown.
//! - `server`: Actix Web routes.
//! - `telemetry`: Tracing and Prometheus setup.

/// Re-export settings so callers can configure runs without reaching into
/// submodules.
pub use config::{CoachCliArgs, CoachConfig};
/// Launch the service with a ready-made configuration.
pub use service::run;

mod annotation;
mod broadcast;
mod camera;
mod config;
mod coordinator;
mod pipeline;
mod server;
mod service;
mod telemetry;
