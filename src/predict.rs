use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use sqlx::PgPool;
use uuid::Uuid;

use crate::artifacts::{ArtifactError, ModelArtifacts, MODEL_VERSION};
use crate::db;
use crate::features::{self, FeatureError, FeatureVector};
use crate::risk::{self, RiskFactor};

/// Process-wide artifact handle: loaded at most once, immutable after,
/// shared by every concurrent prediction.
static ARTIFACTS: OnceCell<Arc<ModelArtifacts>> = OnceCell::new();

/// Load the persisted pair behind the process-wide cell. `None` means the
/// model has not been trained yet; callers report that instead of failing.
pub fn shared_artifacts(dir: &Path) -> Result<Option<Arc<ModelArtifacts>>, ArtifactError> {
    if let Some(loaded) = ARTIFACTS.get() {
        return Ok(Some(Arc::clone(loaded)));
    }
    let Some(artifacts) = ModelArtifacts::load(dir)? else {
        return Ok(None);
    };
    let fresh = Arc::new(artifacts);
    // If another thread won the initialization race its copy is kept;
    // both were loaded from the same immutable files.
    Ok(Some(Arc::clone(ARTIFACTS.get_or_init(|| fresh))))
}

#[derive(Debug, Clone)]
pub struct PredictionReport {
    pub predicted_grade: f64,
    pub confidence_score: f64,
    pub at_risk: bool,
    pub risk_factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
    pub features: FeatureVector,
    pub model_version: &'static str,
}

#[derive(Debug)]
pub enum PredictionOutcome {
    Predicted(PredictionReport),
    /// The pair had no usable rows (unknown student/course, or not
    /// enrolled); no prediction is available for it.
    MissingData(FeatureError),
}

pub struct Predictor {
    artifacts: Arc<ModelArtifacts>,
}

impl Predictor {
    pub fn new(artifacts: Arc<ModelArtifacts>) -> Self {
        Self { artifacts }
    }

    pub async fn predict(
        &self,
        pool: &PgPool,
        student_id: Uuid,
        course_id: Uuid,
    ) -> anyhow::Result<PredictionOutcome> {
        let vector = match features::extract_features(pool, student_id, course_id).await {
            Ok(vector) => vector,
            Err(err) if err.is_missing_data() => {
                return Ok(PredictionOutcome::MissingData(err))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(PredictionOutcome::Predicted(self.score(&vector)))
    }

    /// Score an already-extracted vector. Risk factors and advice are
    /// derived from the SAME vector the model saw, so the persisted
    /// `features_used` exactly explains the persisted grade.
    pub fn score(&self, vector: &FeatureVector) -> PredictionReport {
        let raw_grade = self.artifacts.predict_grade(vector);
        let risk_factors = risk::identify_risk_factors(vector);
        // The unrounded grade drives the flag; rounding is display-only.
        let at_risk = risk::is_at_risk(risk_factors.len(), raw_grade);
        let recommendations = risk::recommendations(vector, &risk_factors);

        PredictionReport {
            predicted_grade: round2(raw_grade),
            confidence_score: round4(confidence_score(raw_grade)),
            at_risk,
            risk_factors,
            recommendations,
            features: *vector,
            model_version: MODEL_VERSION,
        }
    }
}

/// Bounded heuristic, not a statistical interval: predictions near the
/// middle of the grade distribution are more trustworthy than extremes,
/// and the score never reaches fully-certain or fully-worthless.
pub fn confidence_score(predicted_grade: f64) -> f64 {
    (1.0 - (predicted_grade - 75.0).abs() / 100.0).clamp(0.1, 0.9)
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub updated: usize,
    pub skipped: usize,
}

/// Refresh predictions for every active enrollment. Per-row gaps are
/// skipped and counted; they never abort the loop.
pub async fn predict_all(pool: &PgPool, predictor: &Predictor) -> anyhow::Result<BatchSummary> {
    let enrollments = db::fetch_active_enrollments(pool).await?;
    let mut summary = BatchSummary::default();

    for enrollment in enrollments {
        match predictor
            .predict(pool, enrollment.student_id, enrollment.course_id)
            .await?
        {
            PredictionOutcome::Predicted(report) => {
                db::upsert_prediction(pool, enrollment.student_id, enrollment.course_id, &report)
                    .await?;
                summary.updated += 1;
                tracing::debug!(
                    student = %enrollment.student_name,
                    course = %enrollment.course_code,
                    grade = report.predicted_grade,
                    "prediction refreshed"
                );
            }
            PredictionOutcome::MissingData(err) => {
                summary.skipped += 1;
                tracing::warn!(
                    student = %enrollment.student_id,
                    course = %enrollment.course_id,
                    %err,
                    "no prediction for enrollment"
                );
            }
        }
    }

    Ok(summary)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::{train_dataset, LabeledRow, TrainOutcome};

    fn trained_predictor(dir: &Path) -> Predictor {
        let rows: Vec<LabeledRow> = (0..24)
            .map(|i| {
                let current = 40.0 + (i % 12) as f64 * 5.0;
                let attendance = 55.0 + (i % 10) as f64 * 4.0;
                LabeledRow {
                    features: FeatureVector {
                        year_of_study: 1.0 + (i % 4) as f64,
                        current_gpa: 2.5 + (i % 4) as f64 * 0.3,
                        course_difficulty: 1.0 + (i % 3) as f64,
                        course_credits: 3.0,
                        avg_historical_performance: 50.0 + (i % 8) as f64 * 5.0,
                        total_assessments_taken: (i % 9) as f64,
                        current_course_avg: current,
                        assessments_completed: (i % 6) as f64,
                        attendance_rate: attendance,
                        days_enrolled: 20.0 + i as f64 * 3.0,
                    },
                    final_grade: 0.6 * current + 0.4 * attendance,
                }
            })
            .collect();
        match train_dataset(&rows, dir).expect("training run") {
            TrainOutcome::Trained(_) => {}
            TrainOutcome::InsufficientData { .. } => panic!("24 rows must train"),
        }
        let artifacts = ModelArtifacts::load(dir).unwrap().expect("pair present");
        Predictor::new(Arc::new(artifacts))
    }

    fn healthy_vector() -> FeatureVector {
        FeatureVector {
            year_of_study: 2.0,
            current_gpa: 3.2,
            course_difficulty: 2.0,
            course_credits: 3.0,
            avg_historical_performance: 70.0,
            total_assessments_taken: 8.0,
            current_course_avg: 65.0,
            assessments_completed: 5.0,
            attendance_rate: 90.0,
            days_enrolled: 80.0,
        }
    }

    #[test]
    fn confidence_clamps_to_band_for_extreme_grades() {
        assert_eq!(confidence_score(75.0), 0.9);
        assert!((confidence_score(0.0) - 0.25).abs() < 1e-12);
        assert!((confidence_score(150.0) - 0.25).abs() < 1e-12);
        assert_eq!(confidence_score(-100.0), 0.1);
        assert_eq!(confidence_score(300.0), 0.1);
        for grade in [-500.0, 0.0, 55.0, 75.0, 100.0, 500.0] {
            let c = confidence_score(grade);
            assert!((0.1..=0.9).contains(&c), "confidence {c} out of band");
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let predictor = trained_predictor(dir.path());
        let vector = healthy_vector();

        let first = predictor.score(&vector);
        let second = predictor.score(&vector);

        assert_eq!(first.predicted_grade, second.predicted_grade);
        assert_eq!(first.confidence_score, second.confidence_score);
        assert_eq!(first.at_risk, second.at_risk);
        assert_eq!(first.risk_factors, second.risk_factors);
        assert_eq!(first.recommendations, second.recommendations);
    }

    #[test]
    fn report_is_internally_consistent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let predictor = trained_predictor(dir.path());
        let vector = healthy_vector();
        let report = predictor.score(&vector);

        assert_eq!(report.features, vector);
        assert_eq!(report.model_version, MODEL_VERSION);
        assert!(!report.recommendations.is_empty());
        assert!((0.1..=0.9).contains(&report.confidence_score));
        // Two-decimal rounding on the grade, four on the confidence.
        assert_eq!(
            report.predicted_grade,
            (report.predicted_grade * 100.0).round() / 100.0
        );
        assert_eq!(
            report.confidence_score,
            (report.confidence_score * 10_000.0).round() / 10_000.0
        );
    }

    #[test]
    fn low_raw_grade_flags_risk_without_factors() {
        // Zero qualitative factors, forced low grade: the disjunction
        // must still flag the student.
        let vector = healthy_vector();
        assert!(risk::identify_risk_factors(&vector).is_empty());
        assert!(risk::is_at_risk(0, 55.0));
    }

    #[test]
    fn rounding_helpers() {
        assert_eq!(round2(72.154_9), 72.15);
        assert_eq!(round2(72.155_1), 72.16);
        assert_eq!(round4(0.123_456), 0.123_5);
    }
}
