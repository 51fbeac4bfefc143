use std::fmt;

use crate::features::FeatureVector;

pub const ATTENDANCE_FLOOR: f64 = 70.0;
pub const CURRENT_AVG_FLOOR: f64 = 60.0;
pub const HISTORY_FLOOR: f64 = 60.0;
pub const MIN_ASSESSMENTS: f64 = 2.0;
pub const FAILING_GRADE: f64 = 60.0;

/// More than this many factors flags the student on its own.
const FACTOR_LIMIT: usize = 2;

/// The qualitative signals behind an at-risk flag. The label text is
/// persisted verbatim and keyed on by the recommendation lookup, so it
/// must not change without migrating stored predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskFactor {
    LowAttendance,
    PoorCurrentPerformance,
    WeakHistory,
    LimitedAssessmentData,
}

impl RiskFactor {
    pub fn label(self) -> &'static str {
        match self {
            RiskFactor::LowAttendance => "Low attendance rate",
            RiskFactor::PoorCurrentPerformance => "Poor current performance",
            RiskFactor::WeakHistory => "Weak academic history",
            RiskFactor::LimitedAssessmentData => "Limited assessment data",
        }
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Evaluate the four thresholds in fixed order. The order is part of the
/// contract: persisted factor lists and recommendation output follow it.
pub fn identify_risk_factors(features: &FeatureVector) -> Vec<RiskFactor> {
    let mut factors = Vec::new();

    if features.attendance_rate < ATTENDANCE_FLOOR {
        factors.push(RiskFactor::LowAttendance);
    }
    if features.current_course_avg < CURRENT_AVG_FLOOR {
        factors.push(RiskFactor::PoorCurrentPerformance);
    }
    if features.avg_historical_performance < HISTORY_FLOOR {
        factors.push(RiskFactor::WeakHistory);
    }
    if features.assessments_completed < MIN_ASSESSMENTS {
        factors.push(RiskFactor::LimitedAssessmentData);
    }

    factors
}

/// A heavily-flagged student or a low raw prediction alone is enough.
pub fn is_at_risk(factor_count: usize, predicted_grade: f64) -> bool {
    factor_count > FACTOR_LIMIT || predicted_grade < FAILING_GRADE
}

/// Map matched factors to advice lines, in factor order. Advanced courses
/// get an extra line regardless of factors, and the list is never empty.
pub fn recommendations(features: &FeatureVector, factors: &[RiskFactor]) -> Vec<String> {
    let mut lines = Vec::new();

    for factor in factors {
        let line = match factor {
            RiskFactor::LowAttendance => "Improve class attendance to at least 80%",
            RiskFactor::PoorCurrentPerformance => {
                "Seek additional help from instructors or tutors"
            }
            RiskFactor::WeakHistory => "Consider enrolling in academic support programs",
            // No dedicated advice; thin data alone is not actionable.
            RiskFactor::LimitedAssessmentData => continue,
        };
        lines.push(line.to_string());
    }

    if features.course_difficulty == 3.0 {
        lines.push("Allocate extra study time for this advanced course".to_string());
    }

    if lines.is_empty() {
        lines.push("Continue with current study approach".to_string());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(
        attendance_rate: f64,
        current_course_avg: f64,
        avg_historical_performance: f64,
        assessments_completed: f64,
    ) -> FeatureVector {
        FeatureVector {
            year_of_study: 2.0,
            current_gpa: 3.0,
            course_difficulty: 2.0,
            course_credits: 3.0,
            avg_historical_performance,
            total_assessments_taken: 5.0,
            current_course_avg,
            assessments_completed,
            attendance_rate,
            days_enrolled: 60.0,
        }
    }

    #[test]
    fn all_four_factors_come_back_in_fixed_order() {
        let factors = identify_risk_factors(&features(40.0, 50.0, 45.0, 1.0));
        assert_eq!(
            factors,
            vec![
                RiskFactor::LowAttendance,
                RiskFactor::PoorCurrentPerformance,
                RiskFactor::WeakHistory,
                RiskFactor::LimitedAssessmentData,
            ]
        );
        let labels: Vec<&str> = factors.iter().map(|f| f.label()).collect();
        assert_eq!(
            labels,
            vec![
                "Low attendance rate",
                "Poor current performance",
                "Weak academic history",
                "Limited assessment data",
            ]
        );
    }

    #[test]
    fn thresholds_are_strict_less_than() {
        // Sitting exactly on a threshold does not trigger it.
        let factors = identify_risk_factors(&features(70.0, 60.0, 60.0, 2.0));
        assert!(factors.is_empty());
    }

    #[test]
    fn healthy_student_has_no_factors() {
        let factors = identify_risk_factors(&features(90.0, 65.0, 70.0, 5.0));
        assert!(factors.is_empty());
    }

    #[test]
    fn no_grades_anywhere_yields_three_factors() {
        // New student: no grades in any course, no attendance taken yet.
        let factors = identify_risk_factors(&features(0.0, 0.0, 0.0, 0.0));
        assert_eq!(
            factors,
            vec![
                RiskFactor::LowAttendance,
                RiskFactor::PoorCurrentPerformance,
                RiskFactor::WeakHistory,
                RiskFactor::LimitedAssessmentData,
            ]
        );
        // Three factors already flag the student whatever the model says.
        assert!(is_at_risk(factors.len(), 95.0));
    }

    #[test]
    fn low_prediction_alone_flags_at_risk() {
        let factors = identify_risk_factors(&features(90.0, 65.0, 70.0, 5.0));
        assert!(factors.is_empty());
        assert!(is_at_risk(factors.len(), 55.0));
        assert!(!is_at_risk(factors.len(), 60.0));
    }

    #[test]
    fn two_factors_do_not_flag_on_their_own() {
        assert!(!is_at_risk(2, 75.0));
        assert!(is_at_risk(3, 75.0));
    }

    #[test]
    fn recommendations_follow_factor_order() {
        let feats = features(40.0, 50.0, 45.0, 1.0);
        let factors = identify_risk_factors(&feats);
        let lines = recommendations(&feats, &factors);
        assert_eq!(
            lines,
            vec![
                "Improve class attendance to at least 80%",
                "Seek additional help from instructors or tutors",
                "Consider enrolling in academic support programs",
            ]
        );
    }

    #[test]
    fn advanced_course_always_adds_study_time_line() {
        let mut feats = features(90.0, 65.0, 70.0, 5.0);
        feats.course_difficulty = 3.0;
        let lines = recommendations(&feats, &[]);
        assert_eq!(
            lines,
            vec!["Allocate extra study time for this advanced course"]
        );
    }

    #[test]
    fn recommendations_never_empty() {
        let feats = features(90.0, 65.0, 70.0, 5.0);
        let lines = recommendations(&feats, &[]);
        assert_eq!(lines, vec!["Continue with current study approach"]);

        // Thin assessment data carries no advice line of its own, so the
        // default still fires.
        let sparse = features(90.0, 65.0, 70.0, 1.0);
        let factors = identify_risk_factors(&sparse);
        assert_eq!(factors, vec![RiskFactor::LimitedAssessmentData]);
        let lines = recommendations(&sparse, &factors);
        assert_eq!(lines, vec!["Continue with current study approach"]);
    }
}
