//! Body landmark sets and the translation/scale normalisation applied before
//! any two sets are compared.

use std::ops::{Add, Div, Sub};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in the full-body landmark scheme.
pub const LANDMARK_COUNT: usize = 33;
/// Index of the left shoulder in the landmark scheme.
pub const LEFT_SHOULDER: usize = 11;
/// Index of the right shoulder in the landmark scheme.
pub const RIGHT_SHOULDER: usize = 12;

/// Edges of the full-body skeleton, used when drawing detected poses.
pub const POSE_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

/// A single 3-D landmark. Serialised as an `[x, y, z]` triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(self, other: Point3) -> f64 {
        (self - other).norm()
    }

    pub fn midpoint(self, other: Point3) -> Point3 {
        (self + other) / 2.0
    }
}

impl From<[f64; 3]> for Point3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Point3> for [f64; 3] {
    fn from(p: Point3) -> Self {
        [p.x, p.y, p.z]
    }
}

impl Add for Point3 {
    type Output = Point3;

    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Point3;

    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Div<f64> for Point3 {
    type Output = Point3;

    fn div(self, rhs: f64) -> Point3 {
        Point3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("landmark set must contain {expected} points, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// Raised when the shoulder pair cannot serve as a scale reference.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[error("degenerate landmark set: shoulder distance is {shoulder_distance}")]
pub struct DegenerateInputError {
    pub shoulder_distance: f64,
}

/// Ordered, fixed-length set of body landmarks for one frame. Index order is
/// pinned by the estimator and never changes after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point3>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point3>) -> Result<Self, LandmarkError> {
        if points.len() != LANDMARK_COUNT {
            return Err(LandmarkError::Length {
                expected: LANDMARK_COUNT,
                actual: points.len(),
            });
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn left_shoulder(&self) -> Point3 {
        self.points[LEFT_SHOULDER]
    }

    pub fn right_shoulder(&self) -> Point3 {
        self.points[RIGHT_SHOULDER]
    }

    /// Midpoint of the two shoulders.
    pub fn torso_center(&self) -> Point3 {
        self.left_shoulder().midpoint(self.right_shoulder())
    }

    pub fn shoulder_distance(&self) -> f64 {
        self.left_shoulder().distance(self.right_shoulder())
    }
}

/// Translate the torso centre to the origin and scale by the shoulder
/// distance.
///
/// The result is invariant to where the subject stands and how far they are
/// from the camera. It is not invariant to viewing angle.
pub fn normalize(landmarks: &LandmarkSet) -> Result<LandmarkSet, DegenerateInputError> {
    let center = landmarks.torso_center();
    let scale = landmarks.shoulder_distance();
    if !scale.is_finite() || scale == 0.0 {
        return Err(DegenerateInputError {
            shoulder_distance: scale,
        });
    }

    let points = landmarks
        .points
        .iter()
        .map(|&p| (p - center) / scale)
        .collect();
    Ok(LandmarkSet { points })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a full landmark set from a handful of overrides; every other
    /// point sits at a deterministic spot derived from its index.
    pub(crate) fn landmark_set(overrides: &[(usize, [f64; 3])]) -> LandmarkSet {
        let mut points: Vec<Point3> = (0..LANDMARK_COUNT)
            .map(|i| {
                let t = i as f64;
                Point3::new(0.3 + 0.01 * t, 0.2 + 0.02 * t, -0.05 * t)
            })
            .collect();
        for &(idx, p) in overrides {
            points[idx] = p.into();
        }
        LandmarkSet::new(points).unwrap()
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn rejects_wrong_length() {
        let err = LandmarkSet::new(vec![Point3::default(); 17]).unwrap_err();
        assert_eq!(
            err,
            LandmarkError::Length {
                expected: LANDMARK_COUNT,
                actual: 17
            }
        );
    }

    #[test]
    fn normalised_torso_is_centred_and_unit_scaled() {
        let set = landmark_set(&[
            (LEFT_SHOULDER, [0.4, 0.5, 0.1]),
            (RIGHT_SHOULDER, [0.6, 0.5, 0.1]),
        ]);
        let normalised = normalize(&set).unwrap();

        let center = normalised.torso_center();
        assert_close(center.x, 0.0);
        assert_close(center.y, 0.0);
        assert_close(center.z, 0.0);
        assert_close(normalised.shoulder_distance(), 1.0);
    }

    #[test]
    fn normalisation_is_a_fixed_point() {
        let set = landmark_set(&[
            (LEFT_SHOULDER, [0.1, 0.9, -0.3]),
            (RIGHT_SHOULDER, [0.7, 0.4, 0.2]),
        ]);
        let once = normalize(&set).unwrap();
        let twice = normalize(&once).unwrap();

        assert_close(twice.torso_center().norm(), 0.0);
        assert_close(twice.shoulder_distance(), 1.0);
        for (a, b) in once.points().iter().zip(twice.points()) {
            assert_close(a.distance(*b), 0.0);
        }
    }

    #[test]
    fn translation_and_distance_do_not_change_the_result() {
        let near = landmark_set(&[
            (LEFT_SHOULDER, [0.4, 0.5, 0.0]),
            (RIGHT_SHOULDER, [0.6, 0.5, 0.0]),
            (0, [0.5, 0.3, 0.0]),
        ]);
        // Same pose, shifted right and twice as far away.
        let far_points = near
            .points()
            .iter()
            .map(|p| Point3::new(0.25 + p.x / 2.0, 0.1 + p.y / 2.0, p.z / 2.0))
            .collect();
        let far = LandmarkSet::new(far_points).unwrap();

        let a = normalize(&near).unwrap();
        let b = normalize(&far).unwrap();
        for (p, q) in a.points().iter().zip(b.points()) {
            assert_close(p.distance(*q), 0.0);
        }
    }

    #[test]
    fn coincident_shoulders_are_degenerate() {
        let set = landmark_set(&[
            (LEFT_SHOULDER, [0.5, 0.5, 0.0]),
            (RIGHT_SHOULDER, [0.5, 0.5, 0.0]),
        ]);
        let err = normalize(&set).unwrap_err();
        assert_eq!(err.shoulder_distance, 0.0);
    }

    #[test]
    fn points_deserialise_from_triples() {
        let p: Point3 = serde_json::from_str("[1.0, 2.5, -3.0]").unwrap();
        assert_eq!(p, Point3::new(1.0, 2.5, -3.0));
        assert!(serde_json::from_str::<Point3>("[1.0, 2.0]").is_err());
    }
}
