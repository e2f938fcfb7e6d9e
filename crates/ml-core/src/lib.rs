//! Pose maths shared by the pose-coach service: landmark normalisation,
//! similarity scoring, the reference library and the estimator seam.
//!
//! Enable the `with-ort` feature to pull in the ONNX Runtime backed
//! [`blazepose::BlazePoseEstimator`].

pub mod estimator;
pub mod landmarks;
pub mod library;
pub mod scoring;

#[cfg(feature = "with-ort")]
pub mod blazepose;

pub use estimator::{DisabledEstimator, PoseEstimator};
pub use landmarks::{
    DegenerateInputError, LANDMARK_COUNT, LandmarkError, LandmarkSet, Point3, normalize,
};
pub use library::{LoadError, ReferenceLibrary};
pub use scoring::{
    FeedbackBand, PoseMatch, ScoreResult, ScoringPolicy, evaluate, find_best_match, score,
};
