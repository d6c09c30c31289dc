//! Per-job scan progress, stored as `{dir}/{job}-progress.json`.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{coordinate::Coordinate, utils::write_atomic};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to write checkpoint {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode checkpoint")]
    Encode(#[from] serde_json::Error),
}

/// The last coordinate a scan fully processed.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub last_lat: f64,
    pub last_lon: f64,
}

impl From<Coordinate> for Checkpoint {
    fn from(at: Coordinate) -> Self {
        Self {
            last_lat: at.lat(),
            last_lon: at.lon(),
        }
    }
}

/// How much of a coordinate survives a save.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PrecisionRepr")]
pub enum Precision {
    #[default]
    Full,
    Decimals(u32),
}

impl Precision {
    /// Largest distance between a coordinate and what gets saved for it.
    pub fn slack(&self) -> f64 {
        match self {
            Self::Full => 0.0,
            Self::Decimals(d) => 0.5 * 10f64.powi(-(*d as i32)),
        }
    }

    /// Smallest difference a saved coordinate can express, if any.
    pub fn unit(&self) -> Option<f64> {
        match self {
            Self::Full => None,
            Self::Decimals(d) => Some(10f64.powi(-(*d as i32))),
        }
    }

    fn apply(&self, at: Coordinate) -> Coordinate {
        match self {
            Self::Full => at,
            Self::Decimals(d) => at.rounded(*d),
        }
    }
}

// `precision: full` or `precision: 2` in job config
#[derive(Deserialize)]
#[serde(untagged)]
enum PrecisionRepr {
    Decimals(u32),
    Name(String),
}

impl TryFrom<PrecisionRepr> for Precision {
    type Error = String;

    fn try_from(value: PrecisionRepr) -> Result<Self, String> {
        match value {
            PrecisionRepr::Decimals(d) if d <= 15 => Ok(Self::Decimals(d)),
            PrecisionRepr::Decimals(d) => Err(format!("at most 15 decimal places, got {d}")),
            PrecisionRepr::Name(x) if x == "full" => Ok(Self::Full),
            PrecisionRepr::Name(x) => Err(format!("unknown precision: {x}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    precision: Precision,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            precision: Precision::Full,
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn path(&self, job: &str) -> PathBuf {
        self.dir.join(format!("{job}-progress.json"))
    }

    /// Replaces the job's checkpoint and returns the coordinate as stored.
    ///
    /// The record is written beside the slot and renamed over it, so a
    /// reader sees either the old checkpoint or the new one.
    pub fn save(&self, job: &str, at: Coordinate) -> Result<Coordinate, CheckpointError> {
        let at = self.precision.apply(at);
        let path = self.path(job);
        let contents = serde_json::to_string(&Checkpoint::from(at))?;
        write_atomic(&path, contents.as_bytes())
            .map_err(|source| CheckpointError::Io { path, source })?;
        Ok(at)
    }

    /// The job's last saved coordinate. Missing or unusable records read as
    /// no checkpoint.
    pub fn load(&self, job: &str) -> Option<Coordinate> {
        let path = self.path(job);
        let contents = match fs::read_to_string(&path) {
            Ok(x) => x,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(job, path = %path.display(), "no checkpoint");
                return None;
            }
            Err(e) => {
                warn!(job, path = %path.display(), error = %e, "unreadable checkpoint, ignoring");
                return None;
            }
        };
        parse(&path, &contents)
    }

    pub fn clear(&self, job: &str) -> Result<(), CheckpointError> {
        let path = self.path(job);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Io { path, source }),
        }
    }
}

fn parse(path: &Path, contents: &str) -> Option<Coordinate> {
    let checkpoint: Checkpoint = match serde_json::from_str(contents) {
        Ok(x) => x,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt checkpoint, ignoring");
            return None;
        }
    };
    match Coordinate::new(checkpoint.last_lat, checkpoint.last_lon) {
        Ok(x) => Some(x),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "checkpoint out of bounds, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn full_precision_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        for at in [
            c(-33.868_820_000_000_001, 151.209_291_234_567_89),
            c(-90.0, -180.0),
            c(90.0, 180.0),
            c(0.1 + 0.2, 1e-300),
            c(-12.345_678_901_234_5, 130.000_000_000_001),
        ] {
            assert_eq!(store.save("woolworths", at).unwrap(), at);
            assert_eq!(store.load("woolworths"), Some(at));
        }
    }

    #[test]
    fn rounded_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).with_precision(Precision::Decimals(2));

        let saved = store.save("coles", c(-33.868_82, 151.209_29)).unwrap();
        assert_eq!(saved, c(-33.87, 151.21));
        assert_eq!(store.load("coles"), Some(c(-33.87, 151.21)));

        let raw = fs::read_to_string(store.path("coles")).unwrap();
        assert_eq!(raw, r#"{"last_lat":-33.87,"last_lon":151.21}"#);
    }

    #[test]
    fn overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save("coles", c(-34.0, 151.0)).unwrap();
        store.save("coles", c(-33.95, 151.05)).unwrap();
        assert_eq!(store.load("coles"), Some(c(-33.95, 151.05)));

        // only the slot is left behind
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|x| x.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["coles-progress.json"]);
    }

    #[test]
    fn jobs_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save("coles", c(-34.0, 151.0)).unwrap();
        assert_eq!(store.load("woolworths"), None);
    }

    #[test]
    fn missing_or_corrupt_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert_eq!(store.load("coles"), None);

        for contents in [
            "",
            "{",
            "not json",
            r#"{"last_lat":-33.9}"#,
            r#"{"last_lat":"-33.9","last_lon":151.0}"#,
            r#"{"last_lat":-33.9,"last_lon":151.0,"extra":1}"#,
            r#"{"last_lat":-95.0,"last_lon":151.0}"#,
            r#"[-33.9,151.0]"#,
        ] {
            fs::write(store.path("coles"), contents).unwrap();
            assert_eq!(store.load("coles"), None, "{contents}");
        }
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("a").join("b"));
        store.save("coles", c(-34.0, 151.0)).unwrap();
        assert_eq!(store.load("coles"), Some(c(-34.0, 151.0)));
    }

    #[test]
    fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();

        let store = CheckpointStore::new(&blocker);
        let err = store.save("coles", c(-34.0, 151.0)).unwrap_err();
        assert!(matches!(err, CheckpointError::Io { .. }));
        assert_eq!(store.load("coles"), None);
    }

    #[test]
    fn clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.clear("coles").unwrap();
        store.save("coles", c(-34.0, 151.0)).unwrap();
        store.clear("coles").unwrap();
        assert_eq!(store.load("coles"), None);
    }

    #[test]
    fn precision_from_config() {
        let p: Precision = serde_yaml::from_str("full").unwrap();
        assert_eq!(p, Precision::Full);
        let p: Precision = serde_yaml::from_str("2").unwrap();
        assert_eq!(p, Precision::Decimals(2));
        assert!(serde_yaml::from_str::<Precision>("coarse").is_err());
        assert!(serde_yaml::from_str::<Precision>("40").is_err());
    }

    #[test]
    fn slack() {
        assert_eq!(Precision::Full.slack(), 0.0);
        assert!((Precision::Decimals(2).slack() - 0.005).abs() < 1e-12);
        assert_eq!(Precision::Full.unit(), None);
    }
}
