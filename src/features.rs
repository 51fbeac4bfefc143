use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::db;
use crate::models::{AttendanceTally, Course, Enrollment, GradeRow, StudentProfile};

/// Canonical feature order. The scaler and the model are fitted against
/// this exact ordering, so it doubles as the artifact schema version:
/// changing it invalidates previously persisted model/scaler pairs.
pub const FEATURE_NAMES: [&str; 10] = [
    "year_of_study",
    "current_gpa",
    "course_difficulty",
    "course_credits",
    "avg_historical_performance",
    "total_assessments_taken",
    "current_course_avg",
    "assessments_completed",
    "attendance_rate",
    "days_enrolled",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Fixed-width numeric summary of one (student, course) pair. Every field
/// is always a finite number; missing inputs collapse to 0.0 so the scaler
/// never sees a hole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub year_of_study: f64,
    pub current_gpa: f64,
    pub course_difficulty: f64,
    pub course_credits: f64,
    pub avg_historical_performance: f64,
    pub total_assessments_taken: f64,
    pub current_course_avg: f64,
    pub assessments_completed: f64,
    pub attendance_rate: f64,
    pub days_enrolled: f64,
}

impl FeatureVector {
    /// Values in `FEATURE_NAMES` order, for the scaler/model boundary.
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.year_of_study,
            self.current_gpa,
            self.course_difficulty,
            self.course_credits,
            self.avg_historical_performance,
            self.total_assessments_taken,
            self.current_course_avg,
            self.assessments_completed,
            self.attendance_rate,
            self.days_enrolled,
        ]
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("student {0} does not exist")]
    UnknownStudent(Uuid),
    #[error("course {0} does not exist")]
    UnknownCourse(Uuid),
    #[error("student {student} has no enrollment in course {course}")]
    NotEnrolled { student: Uuid, course: Uuid },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl FeatureError {
    /// True for per-row gaps that batch jobs skip over. Database faults
    /// are systemic and must propagate instead.
    pub fn is_missing_data(&self) -> bool {
        !matches!(self, FeatureError::Db(_))
    }
}

/// Pull the history for one (student, course) pair and assemble the
/// feature vector. A missing student, course, or enrollment row is a
/// typed failure, not a panic, so a bad pair in a batch run is skippable.
pub async fn extract_features(
    pool: &PgPool,
    student_id: Uuid,
    course_id: Uuid,
) -> Result<FeatureVector, FeatureError> {
    let student = db::fetch_student(pool, student_id)
        .await?
        .ok_or(FeatureError::UnknownStudent(student_id))?;
    let course = db::fetch_course(pool, course_id)
        .await?
        .ok_or(FeatureError::UnknownCourse(course_id))?;
    let enrollment = db::fetch_enrollment(pool, student_id, course_id)
        .await?
        .ok_or(FeatureError::NotEnrolled {
            student: student_id,
            course: course_id,
        })?;
    let grades = db::fetch_grades(pool, student_id).await?;
    let attendance = db::fetch_attendance_tally(pool, student_id, course_id).await?;

    Ok(build_features(
        &student,
        &course,
        &enrollment,
        &grades,
        attendance,
        Utc::now().date_naive(),
    ))
}

/// Pure assembly of the feature vector from pre-fetched rows.
pub fn build_features(
    student: &StudentProfile,
    course: &Course,
    enrollment: &Enrollment,
    grades: &[GradeRow],
    attendance: AttendanceTally,
    today: NaiveDate,
) -> FeatureVector {
    // Historical performance deliberately excludes this course's own
    // assessments; current performance only sees published grades.
    let historical: Vec<&GradeRow> = grades
        .iter()
        .filter(|grade| grade.course_id != course.id)
        .collect();
    let current: Vec<&GradeRow> = grades
        .iter()
        .filter(|grade| grade.course_id == course.id && grade.is_published)
        .collect();

    FeatureVector {
        year_of_study: student.year_of_study.trim().parse().unwrap_or(0.0),
        current_gpa: student.gpa.unwrap_or(0.0),
        course_difficulty: difficulty_score(&course.difficulty_level),
        course_credits: f64::from(course.credits),
        avg_historical_performance: mean_percentage(&historical),
        total_assessments_taken: historical.len() as f64,
        current_course_avg: mean_percentage(&current),
        assessments_completed: current.len() as f64,
        attendance_rate: attendance_rate(attendance),
        days_enrolled: (today - enrollment.enrollment_date).num_days() as f64,
    }
}

fn difficulty_score(level: &str) -> f64 {
    match level {
        "beginner" => 1.0,
        "intermediate" => 2.0,
        "advanced" => 3.0,
        _ => 2.0,
    }
}

/// marks/total as a percentage. A non-positive total would divide by zero;
/// such rows contribute 0% instead of aborting the batch.
pub fn grade_percentage(grade: &GradeRow) -> f64 {
    if grade.total_marks > 0.0 {
        grade.marks_obtained / grade.total_marks * 100.0
    } else {
        0.0
    }
}

fn mean_percentage(grades: &[&GradeRow]) -> f64 {
    if grades.is_empty() {
        return 0.0;
    }
    grades.iter().map(|grade| grade_percentage(grade)).sum::<f64>() / grades.len() as f64
}

fn attendance_rate(tally: AttendanceTally) -> f64 {
    if tally.total == 0 {
        0.0
    } else {
        tally.present as f64 / tally.total as f64 * 100.0
    }
}
