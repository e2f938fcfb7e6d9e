//! Reference pose library loaded once at startup.
//!
//! The on-disk format is a JSON object mapping each pose name to a list of
//! samples, where every sample is a list of `[x, y, z]` landmark triples:
//!
//! ```json
//! { "tree_pose": [[[0.51, 0.22, -0.31], ...], ...], "no_pose": [...] }
//! ```
//!
//! Key order is preserved because best-match selection depends on it.

use std::{fmt, fs, io, path::Path};

use serde::{
    Deserialize, Deserializer,
    de::{MapAccess, Visitor},
};
use thiserror::Error;

use crate::landmarks::{LANDMARK_COUNT, LandmarkSet, Point3, normalize};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read reference library {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("reference library is not valid: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("pose {pose:?} sample #{sample} has {actual} landmarks, expected {}", LANDMARK_COUNT)]
    Shape {
        pose: String,
        sample: usize,
        actual: usize,
    },
    #[error("pose {pose:?} sample #{sample} has coincident shoulders and cannot be normalised")]
    Degenerate { pose: String, sample: usize },
}

/// Immutable mapping from pose name to reference landmark samples.
#[derive(Debug, Clone, Default)]
pub struct ReferenceLibrary {
    poses: Vec<(String, Vec<LandmarkSet>)>,
}

impl ReferenceLibrary {
    /// Load and validate a library from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, LoadError> {
        let RawLibrary(entries) = serde_json::from_slice(raw)?;
        let mut poses = Vec::with_capacity(entries.len());
        for (pose, samples) in entries {
            let mut sets = Vec::with_capacity(samples.len());
            for (sample, points) in samples.into_iter().enumerate() {
                let actual = points.len();
                let set = LandmarkSet::new(points).map_err(|_| LoadError::Shape {
                    pose: pose.clone(),
                    sample,
                    actual,
                })?;
                sets.push(set);
            }
            poses.push((pose, sets));
        }
        Self::from_entries(poses)
    }

    /// Build a library from already-constructed samples. Every sample must be
    /// normalisable.
    pub fn from_entries(poses: Vec<(String, Vec<LandmarkSet>)>) -> Result<Self, LoadError> {
        for (pose, samples) in &poses {
            for (sample, set) in samples.iter().enumerate() {
                if normalize(set).is_err() {
                    return Err(LoadError::Degenerate {
                        pose: pose.clone(),
                        sample,
                    });
                }
            }
        }
        Ok(Self { poses })
    }

    /// Poses in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[LandmarkSet])> {
        self.poses
            .iter()
            .map(|(name, samples)| (name.as_str(), samples.as_slice()))
    }

    pub fn get(&self, name: &str) -> Option<&[LandmarkSet]> {
        self.poses
            .iter()
            .find(|(pose, _)| pose == name)
            .map(|(_, samples)| samples.as_slice())
    }

    pub fn pose_count(&self) -> usize {
        self.poses.len()
    }

    pub fn sample_count(&self) -> usize {
        self.poses.iter().map(|(_, samples)| samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// Order-preserving view of the JSON object; rejects duplicate keys.
struct RawLibrary(Vec<(String, Vec<Vec<Point3>>)>);

impl<'de> Deserialize<'de> for RawLibrary {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LibraryVisitor;

        impl<'de> Visitor<'de> for LibraryVisitor {
            type Value = RawLibrary;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping pose names to landmark samples")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, Vec<Vec<Point3>>)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, samples)) = map.next_entry::<String, Vec<Vec<Point3>>>()? {
                    if entries.iter().any(|(existing, _)| *existing == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate pose name {name:?}"
                        )));
                    }
                    entries.push((name, samples));
                }
                Ok(RawLibrary(entries))
            }
        }

        deserializer.deserialize_map(LibraryVisitor)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::landmarks::{LEFT_SHOULDER, RIGHT_SHOULDER};

    fn sample_json(shoulder_gap: f64) -> String {
        let points: Vec<String> = (0..LANDMARK_COUNT)
            .map(|i| match i {
                LEFT_SHOULDER => "[0.4, 0.4, 0.0]".to_string(),
                RIGHT_SHOULDER => format!("[{}, 0.4, 0.0]", 0.4 + shoulder_gap),
                _ => format!("[{}, {}, 0.0]", 0.01 * i as f64, 0.02 * i as f64),
            })
            .collect();
        format!("[{}]", points.join(","))
    }

    #[test]
    fn loads_from_file_in_key_order() {
        let sample = sample_json(0.2);
        let body = format!(
            r#"{{"warrior": [{sample}, {sample}], "tree_pose": [{sample}], "no_pose": [{sample}]}}"#
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();

        let library = ReferenceLibrary::load(file.path()).unwrap();
        let names: Vec<&str> = library.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["warrior", "tree_pose", "no_pose"]);
        assert_eq!(library.pose_count(), 3);
        assert_eq!(library.sample_count(), 4);
        assert_eq!(library.get("warrior").map(<[_]>::len), Some(2));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReferenceLibrary::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            ReferenceLibrary::from_slice(b"not json").unwrap_err(),
            LoadError::Parse(_)
        ));
        assert!(matches!(
            ReferenceLibrary::from_slice(br#"{"tree_pose": [[[0.1, 0.2]]]}"#).unwrap_err(),
            LoadError::Parse(_)
        ));
        assert!(matches!(
            ReferenceLibrary::from_slice(br#"{"tree_pose": "oops"}"#).unwrap_err(),
            LoadError::Parse(_)
        ));
    }

    #[test]
    fn wrong_landmark_count_is_a_shape_error() {
        let body = format!(
            r#"{{"tree_pose": [{}, [[0.0, 0.0, 0.0]]]}}"#,
            sample_json(0.2)
        );
        match ReferenceLibrary::from_slice(body.as_bytes()).unwrap_err() {
            LoadError::Shape {
                pose,
                sample,
                actual,
            } => {
                assert_eq!(pose, "tree_pose");
                assert_eq!(sample, 1);
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_pose_names_are_rejected() {
        let sample = sample_json(0.2);
        let body = format!(r#"{{"a": [{sample}], "a": [{sample}]}}"#);
        assert!(matches!(
            ReferenceLibrary::from_slice(body.as_bytes()).unwrap_err(),
            LoadError::Parse(_)
        ));
    }

    #[test]
    fn degenerate_reference_is_rejected() {
        let body = format!(r#"{{"tree_pose": [{}]}}"#, sample_json(0.0));
        assert!(matches!(
            ReferenceLibrary::from_slice(body.as_bytes()).unwrap_err(),
            LoadError::Degenerate { sample: 0, .. }
        ));
    }

    #[test]
    fn empty_library_is_allowed() {
        let library = ReferenceLibrary::from_slice(b"{}").unwrap();
        assert!(library.is_empty());
        assert_eq!(library.sample_count(), 0);
    }
}
