use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use gbdt::decision_tree::Data;
use gbdt::gradient_boost::GBDT;
use thiserror::Error;

use crate::features::FeatureVector;
use crate::scaler::StandardScaler;

/// Tag stored with every persisted prediction. Bump when the feature
/// schema or the model family changes.
pub const MODEL_VERSION: &str = "gbdt-v1";

const MODEL_FILE: &str = "model.json";
const SCALER_FILE: &str = "scaler.json";
const LOCK_FILE: &str = "train.lock";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("another training run holds the lock at {0}")]
    Locked(PathBuf),
    #[error("artifact serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The fitted regressor and its companion scaler. The two are only ever
/// written and read as a pair; a model scored against features scaled by
/// a different fit would be silently wrong.
pub struct ModelArtifacts {
    pub model: GBDT,
    pub scaler: StandardScaler,
}

impl ModelArtifacts {
    /// Scale a raw feature vector with the fitted scaler and run the
    /// regressor on it. Deterministic for a given artifact pair.
    pub fn predict_grade(&self, features: &FeatureVector) -> f64 {
        let scaled = self.scaler.transform(features.as_array());
        let input = vec![Data::new_test_data(
            scaled.iter().map(|&v| v as f32).collect(),
            None,
        )];
        self.model
            .predict(&input)
            .first()
            .copied()
            .map(f64::from)
            .unwrap_or(0.0)
    }

    /// Persist both files under `dir`, each through a temp-file rename,
    /// with a lock file excluding concurrent training runs.
    pub fn save(&self, dir: &Path) -> Result<(), ArtifactError> {
        fs::create_dir_all(dir)?;
        let _lock = TrainLock::acquire(dir.join(LOCK_FILE))?;

        write_atomic(&dir.join(MODEL_FILE), &serde_json::to_vec(&self.model)?)?;
        write_atomic(&dir.join(SCALER_FILE), &serde_json::to_vec(&self.scaler)?)?;
        Ok(())
    }

    /// Load the pair from `dir`. If either file is missing the pair is
    /// treated as absent; a half-present pair is never returned.
    pub fn load(dir: &Path) -> Result<Option<Self>, ArtifactError> {
        let model_path = dir.join(MODEL_FILE);
        let scaler_path = dir.join(SCALER_FILE);
        if !model_path.exists() || !scaler_path.exists() {
            return Ok(None);
        }

        let model: GBDT = serde_json::from_slice(&fs::read(&model_path)?)?;
        let scaler: StandardScaler = serde_json::from_slice(&fs::read(&scaler_path)?)?;
        Ok(Some(Self { model, scaler }))
    }
}

/// Exclusive advisory lock held for the duration of a persist. Created
/// with `create_new` so a second writer fails instead of interleaving.
struct TrainLock {
    path: PathBuf,
}

impl TrainLock {
    fn acquire(path: PathBuf) -> Result<Self, ArtifactError> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(ArtifactError::Locked(path))
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for TrainLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;

    fn tiny_artifacts() -> ModelArtifacts {
        use gbdt::config::Config;

        let rows: Vec<[f64; FEATURE_COUNT]> = (0..20)
            .map(|i| {
                let mut values = [0.0; FEATURE_COUNT];
                for (j, value) in values.iter_mut().enumerate() {
                    *value = (i * 7 + j) as f64 % 13.0;
                }
                values
            })
            .collect();
        let scaler = StandardScaler::fit(&rows);

        let mut cfg = Config::new();
        cfg.set_feature_size(FEATURE_COUNT);
        cfg.set_max_depth(2);
        cfg.set_iterations(5);
        cfg.set_shrinkage(0.3);
        cfg.set_loss("SquaredError");
        cfg.set_debug(false);
        cfg.set_training_optimization_level(2);
        cfg.set_min_leaf_size(1);

        let mut model = GBDT::new(&cfg);
        let mut training: Vec<Data> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let scaled = scaler.transform(*row);
                Data::new_training_data(
                    scaled.iter().map(|&v| v as f32).collect(),
                    1.0,
                    (40 + i * 3) as f32,
                    None,
                )
            })
            .collect();
        model.fit(&mut training);

        ModelArtifacts { model, scaler }
    }

    fn probe() -> FeatureVector {
        FeatureVector {
            year_of_study: 2.0,
            current_gpa: 3.1,
            course_difficulty: 2.0,
            course_credits: 3.0,
            avg_historical_performance: 68.0,
            total_assessments_taken: 6.0,
            current_course_avg: 72.0,
            assessments_completed: 3.0,
            attendance_rate: 85.0,
            days_enrolled: 90.0,
        }
    }

    #[test]
    fn save_then_load_predicts_identically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifacts = tiny_artifacts();
        let before = artifacts.predict_grade(&probe());

        artifacts.save(dir.path()).expect("save pair");
        let restored = ModelArtifacts::load(dir.path())
            .expect("load pair")
            .expect("pair present");
        let after = restored.predict_grade(&probe());

        assert!((before - after).abs() < 1e-6);
    }

    #[test]
    fn missing_companion_file_means_no_pair() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifacts = tiny_artifacts();
        artifacts.save(dir.path()).expect("save pair");

        fs::remove_file(dir.path().join(SCALER_FILE)).expect("drop scaler");
        assert!(ModelArtifacts::load(dir.path())
            .expect("load attempt")
            .is_none());
    }

    #[test]
    fn empty_dir_loads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(ModelArtifacts::load(dir.path())
            .expect("load attempt")
            .is_none());
    }

    #[test]
    fn lock_excludes_second_writer_and_releases_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock_path = dir.path().join(LOCK_FILE);

        let held = TrainLock::acquire(lock_path.clone()).expect("first lock");
        match TrainLock::acquire(lock_path.clone()) {
            Err(ArtifactError::Locked(path)) => assert_eq!(path, lock_path),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected lock conflict"),
        }
        drop(held);

        // Released lock can be re-acquired, and saves work again.
        let _relock = TrainLock::acquire(lock_path).expect("second lock");
    }
}
