use std::path::Path;

use gbdt::config::Config;
use gbdt::decision_tree::Data;
use gbdt::gradient_boost::GBDT;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sqlx::PgPool;

use crate::artifacts::ModelArtifacts;
use crate::db;
use crate::features::{self, FeatureVector, FEATURE_COUNT};
use crate::scaler::StandardScaler;

/// Floor under which a train/test split stops being meaningful.
pub const MIN_TRAINING_ROWS: usize = 10;

const TEST_FRACTION: f64 = 0.2;
/// Fixed seed: the same dataset must always produce the same split and
/// therefore the same persisted model.
const SPLIT_SEED: u64 = 42;

const TREES: usize = 100;
const MAX_DEPTH: u32 = 4;
const SHRINKAGE: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct LabeledRow {
    pub features: FeatureVector,
    pub final_grade: f64,
}

#[derive(Debug)]
pub enum TrainOutcome {
    Trained(TrainingReport),
    /// Too few labeled enrollments; nothing was written and any existing
    /// artifact pair is left untouched.
    InsufficientData { rows: usize },
}

#[derive(Debug)]
pub struct TrainingReport {
    pub samples: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub mse: f64,
    pub r2: f64,
}

/// Build the labeled dataset from completed/failed enrollments carrying a
/// final grade. Rows whose feature extraction fails are skipped, not
/// fatal; a single bad pair must not abort the batch.
pub async fn prepare_training_data(pool: &PgPool) -> anyhow::Result<Vec<LabeledRow>> {
    let enrollments = db::fetch_labeled_enrollments(pool).await?;
    let mut rows = Vec::with_capacity(enrollments.len());
    let mut skipped = 0usize;

    for enrollment in enrollments {
        match features::extract_features(pool, enrollment.student_id, enrollment.course_id).await
        {
            Ok(vector) => rows.push(LabeledRow {
                features: vector,
                final_grade: enrollment.final_grade,
            }),
            Err(err) if err.is_missing_data() => {
                skipped += 1;
                tracing::warn!(
                    student = %enrollment.student_id,
                    course = %enrollment.course_id,
                    %err,
                    "skipping enrollment with unextractable features"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    tracing::info!(kept = rows.len(), skipped, "training data prepared");
    Ok(rows)
}

pub async fn train(pool: &PgPool, model_dir: &Path) -> anyhow::Result<TrainOutcome> {
    let rows = prepare_training_data(pool).await?;
    train_dataset(&rows, model_dir)
}

/// Fit scaler and model on a prepared dataset and persist them as a pair.
/// Deterministic end to end: seeded split, full-sample tree fitting.
pub fn train_dataset(rows: &[LabeledRow], model_dir: &Path) -> anyhow::Result<TrainOutcome> {
    if rows.len() < MIN_TRAINING_ROWS {
        return Ok(TrainOutcome::InsufficientData { rows: rows.len() });
    }

    let (train_rows, test_rows) = split_rows(rows);

    // The scaler only ever sees the training slice; fitting it on the
    // held-out rows would leak into the evaluation.
    let train_matrix: Vec<[f64; FEATURE_COUNT]> = train_rows
        .iter()
        .map(|row| row.features.as_array())
        .collect();
    let scaler = StandardScaler::fit(&train_matrix);

    let mut cfg = Config::new();
    cfg.set_feature_size(FEATURE_COUNT);
    cfg.set_max_depth(MAX_DEPTH);
    cfg.set_iterations(TREES);
    cfg.set_shrinkage(SHRINKAGE);
    cfg.set_loss("SquaredError");
    cfg.set_debug(false);
    cfg.set_training_optimization_level(2);
    cfg.set_min_leaf_size(1);

    let mut model = GBDT::new(&cfg);
    let mut training: Vec<Data> = train_rows
        .iter()
        .map(|row| {
            let scaled = scaler.transform(row.features.as_array());
            Data::new_training_data(
                scaled.iter().map(|&v| v as f32).collect(),
                1.0,
                row.final_grade as f32,
                None,
            )
        })
        .collect();
    model.fit(&mut training);

    // Held-out metrics are diagnostics only; they do not gate persisting.
    let held_out: Vec<Data> = test_rows
        .iter()
        .map(|row| {
            let scaled = scaler.transform(row.features.as_array());
            Data::new_test_data(scaled.iter().map(|&v| v as f32).collect(), None)
        })
        .collect();
    let predicted: Vec<f64> = model.predict(&held_out).iter().map(|&p| f64::from(p)).collect();
    let actual: Vec<f64> = test_rows.iter().map(|row| row.final_grade).collect();
    let mse = mean_squared_error(&actual, &predicted);
    let r2 = r_squared(&actual, &predicted);
    tracing::info!(mse, r2, test_rows = test_rows.len(), "held-out evaluation");

    let artifacts = ModelArtifacts { model, scaler };
    artifacts.save(model_dir)?;

    Ok(TrainOutcome::Trained(TrainingReport {
        samples: rows.len(),
        train_rows: train_rows.len(),
        test_rows: test_rows.len(),
        mse,
        r2,
    }))
}

/// Seeded 80/20 shuffle split. At least one row lands on each side.
fn split_rows(rows: &[LabeledRow]) -> (Vec<&LabeledRow>, Vec<&LabeledRow>) {
    let mut indices: Vec<usize> = (0..rows.len()).collect();
    let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
    indices.shuffle(&mut rng);

    let test_len = ((rows.len() as f64 * TEST_FRACTION).ceil() as usize)
        .clamp(1, rows.len() - 1);
    let (test_idx, train_idx) = indices.split_at(test_len);

    let train = train_idx.iter().map(|&i| &rows[i]).collect();
    let test = test_idx.iter().map(|&i| &rows[i]).collect();
    (train, test)
}

fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}

fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return 0.0;
    }
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic dataset where the label tracks current performance and
    /// attendance, which gives the trees something real to split on.
    fn dataset(n: usize) -> Vec<LabeledRow> {
        (0..n)
            .map(|i| {
                let attendance = 50.0 + (i % 11) as f64 * 5.0;
                let current = 40.0 + (i % 13) as f64 * 4.0;
                let history = 45.0 + (i % 7) as f64 * 6.0;
                let features = FeatureVector {
                    year_of_study: 1.0 + (i % 4) as f64,
                    current_gpa: 2.0 + (i % 5) as f64 * 0.4,
                    course_difficulty: 1.0 + (i % 3) as f64,
                    course_credits: 2.0 + (i % 3) as f64,
                    avg_historical_performance: history,
                    total_assessments_taken: (i % 9) as f64,
                    current_course_avg: current,
                    assessments_completed: (i % 5) as f64,
                    attendance_rate: attendance,
                    days_enrolled: 30.0 + i as f64,
                };
                LabeledRow {
                    features,
                    final_grade: 0.5 * current + 0.3 * attendance + 0.2 * history,
                }
            })
            .collect()
    }

    #[test]
    fn nine_rows_is_insufficient_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = train_dataset(&dataset(9), dir.path()).expect("train attempt");
        match outcome {
            TrainOutcome::InsufficientData { rows } => assert_eq!(rows, 9),
            TrainOutcome::Trained(_) => panic!("9 rows must not train"),
        }
        assert!(
            std::fs::read_dir(dir.path()).expect("read dir").next().is_none(),
            "insufficient data must leave the model directory untouched"
        );
    }

    #[test]
    fn ten_rows_trains_and_persists_a_matched_pair() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = train_dataset(&dataset(10), dir.path()).expect("training run");
        match outcome {
            TrainOutcome::Trained(report) => {
                assert_eq!(report.samples, 10);
                assert_eq!(report.train_rows + report.test_rows, 10);
                assert!(report.test_rows >= 1);
            }
            TrainOutcome::InsufficientData { .. } => panic!("10 rows must train"),
        }
        assert!(ModelArtifacts::load(dir.path())
            .expect("load pair")
            .is_some());
    }

    #[test]
    fn training_is_reproducible() {
        let rows = dataset(40);
        let dir_a = tempfile::tempdir().expect("tempdir");
        let dir_b = tempfile::tempdir().expect("tempdir");

        train_dataset(&rows, dir_a.path()).expect("first run");
        train_dataset(&rows, dir_b.path()).expect("second run");

        let pair_a = ModelArtifacts::load(dir_a.path()).unwrap().unwrap();
        let pair_b = ModelArtifacts::load(dir_b.path()).unwrap().unwrap();

        for row in &rows {
            let a = pair_a.predict_grade(&row.features);
            let b = pair_b.predict_grade(&row.features);
            assert!((a - b).abs() < 1e-6, "same data must yield same model");
        }
    }

    #[test]
    fn split_is_deterministic_and_eighty_twenty() {
        let rows = dataset(20);
        let (train_a, test_a) = split_rows(&rows);
        let (train_b, test_b) = split_rows(&rows);

        assert_eq!(train_a.len(), 16);
        assert_eq!(test_a.len(), 4);
        for (a, b) in train_a.iter().zip(&train_b) {
            assert!((a.final_grade - b.final_grade).abs() < 1e-12);
        }
        for (a, b) in test_a.iter().zip(&test_b) {
            assert!((a.final_grade - b.final_grade).abs() < 1e-12);
        }
    }

    #[test]
    fn metric_helpers_behave() {
        let actual = vec![60.0, 70.0, 80.0];
        assert_eq!(mean_squared_error(&actual, &actual), 0.0);
        assert!((r_squared(&actual, &actual) - 1.0).abs() < 1e-12);

        let off_by_ten = vec![70.0, 80.0, 90.0];
        assert!((mean_squared_error(&actual, &off_by_ten) - 100.0).abs() < 1e-12);

        // Constant actuals have no variance to explain.
        assert_eq!(r_squared(&[50.0, 50.0], &[49.0, 51.0]), 0.0);
    }
}
