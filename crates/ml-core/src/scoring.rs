//! Pose similarity scoring against the reference library.

use serde::{Deserialize, Serialize};

use crate::{
    landmarks::{DegenerateInputError, LandmarkSet, normalize},
    library::ReferenceLibrary,
};

/// Multiplier applied to the clamped base score.
pub const SCORE_AMPLIFICATION: f64 = 1.5;
/// Label reported before any sample has beaten the running best.
pub const UNKNOWN_POSE: &str = "Unknown";
/// Reference category that marks "no recognisable pose".
pub const NO_POSE: &str = "no_pose";

pub const EXCELLENT_THRESHOLD: f64 = 90.0;
pub const GOOD_THRESHOLD: f64 = 85.0;

/// Score `current` against `reference`.
///
/// The mean per-point distance between the normalised sets maps to a base
/// score in `[0, 100]`, which is then amplified by [`SCORE_AMPLIFICATION`].
/// An amplified score above 100 loses half its value, so a perfect match
/// reports 75.
pub fn score(current: &LandmarkSet, reference: &LandmarkSet) -> Result<f64, DegenerateInputError> {
    let current = normalize(current)?;
    let reference = normalize(reference)?;
    Ok(amplify(base_score(&current, &reference)))
}

/// `100 - mean_distance * 100`, clamped to `[0, 100]`. Both sets must already
/// be normalised.
pub fn base_score(current: &LandmarkSet, reference: &LandmarkSet) -> f64 {
    let total: f64 = current
        .points()
        .iter()
        .zip(reference.points())
        .map(|(a, b)| a.distance(*b))
        .sum();
    let mean = total / current.len() as f64;
    (100.0 - mean * 100.0).clamp(0.0, 100.0)
}

pub fn amplify(base: f64) -> f64 {
    let mut amplified = base * SCORE_AMPLIFICATION;
    if amplified > 100.0 {
        amplified -= 0.5 * amplified;
    }
    amplified
}

/// Labels whose selection as running best forces the best score back to 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringPolicy {
    pub reset_labels: Vec<String>,
}

impl ScoringPolicy {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reset_labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_reset_label(&self, name: &str) -> bool {
        self.reset_labels.iter().any(|label| label == name)
    }
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::new([UNKNOWN_POSE, NO_POSE])
    }
}

/// Best-matching pose and its (possibly reset) score.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseMatch {
    pub pose_name: String,
    pub score: f64,
    /// Band of the running best as of the last compared sample. `None` when
    /// the library held no samples.
    pub band: Option<FeedbackBand>,
}

/// Walk every sample of every pose in library order and keep the strictly
/// highest score. After each sample, a running best whose name is a reset
/// label has its score forced to 0.
pub fn find_best_match(
    current: &LandmarkSet,
    library: &ReferenceLibrary,
    policy: &ScoringPolicy,
) -> Result<PoseMatch, DegenerateInputError> {
    // Normalise once up front so a degenerate live set fails before the loop.
    normalize(current)?;

    let mut best = PoseMatch {
        pose_name: UNKNOWN_POSE.to_string(),
        score: 0.0,
        band: None,
    };
    for (pose_name, samples) in library.iter() {
        for sample in samples {
            let candidate = score(current, sample)?;
            if candidate > best.score {
                best.score = candidate;
                best.pose_name.clear();
                best.pose_name.push_str(pose_name);
            }
            if policy.is_reset_label(&best.pose_name) {
                best.score = 0.0;
            }
            best.band = Some(FeedbackBand::from_score(best.score));
        }
    }
    Ok(best)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackBand {
    Excellent,
    Good,
    NeedsImprovement,
}

impl FeedbackBand {
    pub fn from_score(score: f64) -> Self {
        if score > EXCELLENT_THRESHOLD {
            FeedbackBand::Excellent
        } else if score > GOOD_THRESHOLD {
            FeedbackBand::Good
        } else {
            FeedbackBand::NeedsImprovement
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            FeedbackBand::Excellent => "Nice!! You are doing good!!",
            FeedbackBand::Good => "Good!! But, You can do better!!",
            FeedbackBand::NeedsImprovement => "Needs Improvement!!",
        }
    }

    /// Whether the overlay should render in the "positive" colour.
    pub fn is_positive(self) -> bool {
        !matches!(self, FeedbackBand::NeedsImprovement)
    }
}

/// Per-frame scoring outcome pushed to every feedback subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    #[serde(rename = "pose")]
    pub pose_name: String,
    pub score: u8,
    #[serde(rename = "feedback")]
    pub feedback_text: String,
    /// Banded from the unrounded score, so it always agrees with
    /// `feedback_text` even where truncation drops `score` to the threshold.
    #[serde(skip)]
    pub positive: bool,
}

impl From<PoseMatch> for ScoreResult {
    fn from(best: PoseMatch) -> Self {
        Self {
            pose_name: best.pose_name,
            score: best.score.clamp(0.0, 100.0).trunc() as u8,
            feedback_text: best
                .band
                .map(|band| band.message().to_string())
                .unwrap_or_default(),
            positive: best.band.is_some_and(FeedbackBand::is_positive),
        }
    }
}

/// Score `current` against the library and package the result for
/// broadcast.
pub fn evaluate(
    current: &LandmarkSet,
    library: &ReferenceLibrary,
    policy: &ScoringPolicy,
) -> Result<ScoreResult, DegenerateInputError> {
    find_best_match(current, library, policy).map(ScoreResult::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{
        LEFT_SHOULDER, Point3, RIGHT_SHOULDER, tests::landmark_set,
    };

    fn reference() -> LandmarkSet {
        landmark_set(&[
            (LEFT_SHOULDER, [0.4, 0.4, 0.0]),
            (RIGHT_SHOULDER, [0.6, 0.4, 0.0]),
        ])
    }

    /// Shift every non-shoulder point of `set` by `dx` in normalised units.
    fn offset(set: &LandmarkSet, dx: f64) -> LandmarkSet {
        let scale = set.shoulder_distance();
        let points = set
            .points()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i == LEFT_SHOULDER || i == RIGHT_SHOULDER {
                    *p
                } else {
                    Point3::new(p.x + dx * scale, p.y, p.z)
                }
            })
            .collect();
        LandmarkSet::new(points).unwrap()
    }

    fn library(entries: Vec<(&str, Vec<LandmarkSet>)>) -> ReferenceLibrary {
        ReferenceLibrary::from_entries(
            entries
                .into_iter()
                .map(|(name, samples)| (name.to_string(), samples))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn identical_sets_score_75_after_correction() {
        let set = reference();
        let current = normalize(&set).unwrap();
        assert_eq!(base_score(&current, &current), 100.0);
        assert_eq!(score(&set, &set).unwrap(), 75.0);
    }

    #[test]
    fn amplification_is_not_monotonic() {
        assert_eq!(amplify(0.0), 0.0);
        assert_eq!(amplify(60.0), 90.0);
        assert_eq!(amplify(64.0), 96.0);
        assert_eq!(amplify(80.0), 60.0);
        assert_eq!(amplify(100.0), 75.0);
        assert!(amplify(60.0) > amplify(100.0));
    }

    #[test]
    fn distant_pose_clamps_to_zero() {
        let set = reference();
        let far = offset(&set, 5.0);
        assert_eq!(score(&far, &set).unwrap(), 0.0);
    }

    #[test]
    fn perfect_match_lands_in_needs_improvement_band() {
        let refs = reference();
        let lib = library(vec![("tree_pose", vec![refs.clone()])]);

        let result = evaluate(&refs, &lib, &ScoringPolicy::default()).unwrap();
        assert_eq!(result.pose_name, "tree_pose");
        assert_eq!(result.score, 75);
        assert_eq!(result.feedback_text, "Needs Improvement!!");
    }

    #[test]
    fn best_sample_wins_across_poses() {
        let refs = reference();
        // 31 of 33 points off by 0.3 -> mean ~0.282 -> base ~71.8 -> ~107.7 -> ~53.9
        let close = offset(&refs, 0.3);
        // 31 of 33 points off by 0.1 -> mean ~0.094 -> base ~90.6 -> ~135.9 -> ~67.9
        let closer = offset(&refs, 0.1);
        let lib = library(vec![("warrior", vec![close]), ("tree_pose", vec![closer])]);

        let best = find_best_match(&refs, &lib, &ScoringPolicy::default()).unwrap();
        assert_eq!(best.pose_name, "tree_pose");
        assert!(best.score > 67.0 && best.score < 69.0, "{}", best.score);
    }

    #[test]
    fn no_pose_best_forces_zero_score() {
        let refs = reference();
        let lib = library(vec![("no_pose", vec![refs.clone()])]);

        let best = find_best_match(&refs, &lib, &ScoringPolicy::default()).unwrap();
        assert_eq!(best.pose_name, "no_pose");
        assert_eq!(best.score, 0.0);
        assert_eq!(ScoreResult::from(best).score, 0);
    }

    #[test]
    fn reset_lets_a_later_weaker_sample_take_over() {
        let refs = reference();
        let weaker = offset(&refs, 0.3);
        let lib = library(vec![("no_pose", vec![refs.clone()]), ("warrior", vec![weaker])]);

        let best = find_best_match(&refs, &lib, &ScoringPolicy::default()).unwrap();
        assert_eq!(best.pose_name, "warrior");
        assert!(best.score > 0.0);
    }

    #[test]
    fn nothing_beats_zero_reports_unknown() {
        let refs = reference();
        let lib = library(vec![("warrior", vec![offset(&refs, 5.0)])]);

        let result = evaluate(&refs, &lib, &ScoringPolicy::default()).unwrap();
        assert_eq!(result.pose_name, UNKNOWN_POSE);
        assert_eq!(result.score, 0);
        assert_eq!(result.feedback_text, "Needs Improvement!!");
    }

    #[test]
    fn reset_labels_are_configurable_and_exact() {
        let refs = reference();
        let lib = library(vec![("idle", vec![refs.clone()])]);

        let default = find_best_match(&refs, &lib, &ScoringPolicy::default()).unwrap();
        assert_eq!(default.score, 75.0);

        let custom = find_best_match(&refs, &lib, &ScoringPolicy::new(["idle"])).unwrap();
        assert_eq!(custom.score, 0.0);

        let case = find_best_match(&refs, &lib, &ScoringPolicy::new(["IDLE"])).unwrap();
        assert_eq!(case.score, 75.0);
    }

    #[test]
    fn empty_library_reports_unknown_without_feedback() {
        let refs = reference();
        let result = evaluate(&refs, &library(vec![]), &ScoringPolicy::default()).unwrap();
        assert_eq!(result.pose_name, UNKNOWN_POSE);
        assert_eq!(result.score, 0);
        assert_eq!(result.feedback_text, "");
        assert!(!result.positive);
    }

    #[test]
    fn truncated_score_keeps_band_of_unrounded_score() {
        let result = ScoreResult::from(PoseMatch {
            pose_name: "tree_pose".into(),
            score: 85.5,
            band: Some(FeedbackBand::from_score(85.5)),
        });
        assert_eq!(result.score, 85);
        assert_eq!(result.feedback_text, "Good!! But, You can do better!!");
        assert!(result.positive);
    }

    #[test]
    fn degenerate_live_set_is_an_error() {
        let refs = reference();
        let lib = library(vec![("tree_pose", vec![refs])]);
        let flat = landmark_set(&[
            (LEFT_SHOULDER, [0.5, 0.5, 0.0]),
            (RIGHT_SHOULDER, [0.5, 0.5, 0.0]),
        ]);
        assert!(find_best_match(&flat, &lib, &ScoringPolicy::default()).is_err());
    }

    #[test]
    fn feedback_bands() {
        assert_eq!(FeedbackBand::from_score(90.5), FeedbackBand::Excellent);
        assert_eq!(FeedbackBand::from_score(90.0), FeedbackBand::Good);
        assert_eq!(FeedbackBand::from_score(85.5), FeedbackBand::Good);
        assert_eq!(FeedbackBand::from_score(85.0), FeedbackBand::NeedsImprovement);
        assert_eq!(FeedbackBand::from_score(75.0), FeedbackBand::NeedsImprovement);
    }

    #[test]
    fn score_result_wire_format() {
        let result = ScoreResult {
            pose_name: "tree_pose".into(),
            score: 75,
            feedback_text: "Needs Improvement!!".into(),
            positive: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "pose": "tree_pose",
                "score": 75,
                "feedback": "Needs Improvement!!"
            })
        );
    }
}
