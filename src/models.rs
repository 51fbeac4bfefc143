use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StudentProfile {
    pub id: Uuid,
    pub student_number: String,
    pub full_name: String,
    pub email: String,
    pub year_of_study: String,
    pub gpa: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub credits: i32,
    pub difficulty_level: String,
}

/// The slice of an enrollment row the feature extractor needs: proof the
/// pair exists, plus the date "days enrolled" is measured from.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub enrollment_date: NaiveDate,
}

/// One grade row joined with its assessment, enough to compute a
/// percentage and to tell which course it belongs to.
#[derive(Debug, Clone)]
pub struct GradeRow {
    pub course_id: Uuid,
    pub marks_obtained: f64,
    pub total_marks: f64,
    pub is_published: bool,
}

/// Present/total counts for one (student, course) pair. Only rows with
/// status `present` count toward `present`; late and excused do not.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttendanceTally {
    pub present: i64,
    pub total: i64,
}

/// A finished enrollment usable as a training example.
#[derive(Debug, Clone)]
pub struct LabeledEnrollment {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub final_grade: f64,
}

#[derive(Debug, Clone)]
pub struct ActiveEnrollment {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub student_name: String,
    pub course_code: String,
}

/// A persisted prediction joined with student and course labels, as read
/// back for the at-risk listing and the markdown report.
#[derive(Debug, Clone)]
pub struct PredictionRow {
    pub student_name: String,
    pub student_email: String,
    pub course_code: String,
    pub course_name: String,
    pub predicted_grade: f64,
    pub confidence_score: f64,
    pub at_risk: bool,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub model_version: String,
    pub predicted_at: DateTime<Utc>,
}
