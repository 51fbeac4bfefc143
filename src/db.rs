use anyhow::Context;
use chrono::{Duration, NaiveDate};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    ActiveEnrollment, AttendanceTally, Course, Enrollment, GradeRow, LabeledEnrollment,
    PredictionRow, StudentProfile,
};
use crate::predict::PredictionReport;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn fetch_student(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<StudentProfile>> {
    let row = sqlx::query(
        "SELECT id, student_number, full_name, email, year_of_study, gpa \
         FROM gradecast.students WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| StudentProfile {
        id: row.get("id"),
        student_number: row.get("student_number"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        year_of_study: row.get("year_of_study"),
        gpa: row.get("gpa"),
    }))
}

pub async fn fetch_course(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<Course>> {
    let row = sqlx::query(
        "SELECT id, code, name, credits, difficulty_level \
         FROM gradecast.courses WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| Course {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        credits: row.get("credits"),
        difficulty_level: row.get("difficulty_level"),
    }))
}

pub async fn fetch_enrollment(
    pool: &PgPool,
    student_id: Uuid,
    course_id: Uuid,
) -> sqlx::Result<Option<Enrollment>> {
    let row = sqlx::query(
        "SELECT student_id, course_id, enrollment_date \
         FROM gradecast.enrollments WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| Enrollment {
        student_id: row.get("student_id"),
        course_id: row.get("course_id"),
        enrollment_date: row.get("enrollment_date"),
    }))
}

/// Every grade the student has, joined with its assessment so the feature
/// extractor can split current-course from historical rows itself.
pub async fn fetch_grades(pool: &PgPool, student_id: Uuid) -> sqlx::Result<Vec<GradeRow>> {
    let rows = sqlx::query(
        "SELECT a.course_id, g.marks_obtained, a.total_marks, g.is_published \
         FROM gradecast.grades g \
         JOIN gradecast.assessments a ON a.id = g.assessment_id \
         WHERE g.student_id = $1 \
         ORDER BY g.graded_at",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| GradeRow {
            course_id: row.get("course_id"),
            marks_obtained: row.get("marks_obtained"),
            total_marks: row.get("total_marks"),
            is_published: row.get("is_published"),
        })
        .collect())
}

pub async fn fetch_attendance_tally(
    pool: &PgPool,
    student_id: Uuid,
    course_id: Uuid,
) -> sqlx::Result<AttendanceTally> {
    let row = sqlx::query(
        "SELECT COUNT(*) FILTER (WHERE status = 'present') AS present, COUNT(*) AS total \
         FROM gradecast.attendance_records \
         WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(AttendanceTally {
        present: row.get("present"),
        total: row.get("total"),
    })
}

/// Finished enrollments with a recorded final grade: the training labels.
pub async fn fetch_labeled_enrollments(pool: &PgPool) -> anyhow::Result<Vec<LabeledEnrollment>> {
    let rows = sqlx::query(
        "SELECT student_id, course_id, final_grade \
         FROM gradecast.enrollments \
         WHERE status IN ('completed', 'failed') AND final_grade IS NOT NULL \
         ORDER BY student_id, course_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| LabeledEnrollment {
            student_id: row.get("student_id"),
            course_id: row.get("course_id"),
            final_grade: row.get("final_grade"),
        })
        .collect())
}

pub async fn fetch_active_enrollments(pool: &PgPool) -> anyhow::Result<Vec<ActiveEnrollment>> {
    let rows = sqlx::query(
        "SELECT e.student_id, e.course_id, st.full_name, c.code \
         FROM gradecast.enrollments e \
         JOIN gradecast.students st ON st.id = e.student_id \
         JOIN gradecast.courses c ON c.id = e.course_id \
         WHERE e.status = 'enrolled' AND e.is_active \
         ORDER BY st.full_name, c.code",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ActiveEnrollment {
            student_id: row.get("student_id"),
            course_id: row.get("course_id"),
            student_name: row.get("full_name"),
            course_code: row.get("code"),
        })
        .collect())
}

/// Last-write-wins upsert keyed on (student, course). The feature vector
/// that produced the grade is stored verbatim for auditability.
pub async fn upsert_prediction(
    pool: &PgPool,
    student_id: Uuid,
    course_id: Uuid,
    report: &PredictionReport,
) -> anyhow::Result<()> {
    let risk_factors: Vec<String> = report
        .risk_factors
        .iter()
        .map(|factor| factor.label().to_string())
        .collect();

    sqlx::query(
        r#"
        INSERT INTO gradecast.performance_predictions
        (id, student_id, course_id, predicted_grade, confidence_score, at_risk,
         risk_factors, recommendations, features_used, model_version, predicted_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
        ON CONFLICT (student_id, course_id) DO UPDATE
        SET predicted_grade = EXCLUDED.predicted_grade,
            confidence_score = EXCLUDED.confidence_score,
            at_risk = EXCLUDED.at_risk,
            risk_factors = EXCLUDED.risk_factors,
            recommendations = EXCLUDED.recommendations,
            features_used = EXCLUDED.features_used,
            model_version = EXCLUDED.model_version,
            predicted_at = EXCLUDED.predicted_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(course_id)
    .bind(report.predicted_grade)
    .bind(report.confidence_score)
    .bind(report.at_risk)
    .bind(&risk_factors)
    .bind(&report.recommendations)
    .bind(sqlx::types::Json(report.features))
    .bind(report.model_version)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn fetch_predictions(
    pool: &PgPool,
    only_at_risk: bool,
) -> anyhow::Result<Vec<PredictionRow>> {
    let mut query = String::from(
        "SELECT st.full_name, st.email, c.code, c.name AS course_name, \
         p.predicted_grade, p.confidence_score, p.at_risk, p.risk_factors, \
         p.recommendations, p.model_version, p.predicted_at \
         FROM gradecast.performance_predictions p \
         JOIN gradecast.students st ON st.id = p.student_id \
         JOIN gradecast.courses c ON c.id = p.course_id",
    );
    if only_at_risk {
        query.push_str(" WHERE p.at_risk");
    }
    query.push_str(" ORDER BY p.predicted_grade");

    let rows = sqlx::query(&query).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|row| PredictionRow {
            student_name: row.get("full_name"),
            student_email: row.get("email"),
            course_code: row.get("code"),
            course_name: row.get("course_name"),
            predicted_grade: row.get("predicted_grade"),
            confidence_score: row.get("confidence_score"),
            at_risk: row.get("at_risk"),
            risk_factors: row.get("risk_factors"),
            recommendations: row.get("recommendations"),
            model_version: row.get("model_version"),
            predicted_at: row.get("predicted_at"),
        })
        .collect())
}

pub async fn list_students(pool: &PgPool) -> anyhow::Result<Vec<StudentProfile>> {
    let rows = sqlx::query(
        "SELECT id, student_number, full_name, email, year_of_study, gpa \
         FROM gradecast.students ORDER BY student_number",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| StudentProfile {
            id: row.get("id"),
            student_number: row.get("student_number"),
            full_name: row.get("full_name"),
            email: row.get("email"),
            year_of_study: row.get("year_of_study"),
            gpa: row.get("gpa"),
        })
        .collect())
}

pub async fn list_courses(pool: &PgPool) -> anyhow::Result<Vec<Course>> {
    let rows = sqlx::query(
        "SELECT id, code, name, credits, difficulty_level \
         FROM gradecast.courses WHERE is_active ORDER BY code",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Course {
            id: row.get("id"),
            code: row.get("code"),
            name: row.get("name"),
            credits: row.get("credits"),
            difficulty_level: row.get("difficulty_level"),
        })
        .collect())
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// Bulk-load attendance from CSV. Rows naming an unknown student, an
/// unknown course, or a bogus status are skipped and counted; the rest
/// upsert on (student, course, date).
pub async fn import_attendance_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<ImportSummary> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_number: String,
        course_code: String,
        date: NaiveDate,
        status: String,
    }

    const STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut summary = ImportSummary::default();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;

        if !STATUSES.contains(&row.status.as_str()) {
            summary.skipped += 1;
            tracing::warn!(status = %row.status, "skipping row with unknown status");
            continue;
        }

        let student_id: Option<Uuid> =
            sqlx::query("SELECT id FROM gradecast.students WHERE student_number = $1")
                .bind(&row.student_number)
                .fetch_optional(pool)
                .await?
                .map(|r| r.get("id"));
        let course_id: Option<Uuid> =
            sqlx::query("SELECT id FROM gradecast.courses WHERE code = $1")
                .bind(&row.course_code)
                .fetch_optional(pool)
                .await?
                .map(|r| r.get("id"));

        let (Some(student_id), Some(course_id)) = (student_id, course_id) else {
            summary.skipped += 1;
            tracing::warn!(
                student = %row.student_number,
                course = %row.course_code,
                "skipping row for unknown student or course"
            );
            continue;
        };

        sqlx::query(
            r#"
            INSERT INTO gradecast.attendance_records (id, student_id, course_id, date, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, course_id, date) DO UPDATE SET status = EXCLUDED.status
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(course_id)
        .bind(row.date)
        .bind(&row.status)
        .execute(pool)
        .await?;

        summary.inserted += 1;
    }

    Ok(summary)
}

/// Deterministic sample data: four students, five courses, twelve finished
/// enrollments with final grades (enough to train on a fresh database) and
/// four active ones with in-course grades and attendance.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        (
            Uuid::parse_str("6f1f6a1e-8c2a-4a5e-9d7b-0b2f1f5b9a01")?,
            "ST0001",
            "Avery Lee",
            "avery.lee@campus.edu",
            "2",
            Some(3.4_f64),
        ),
        (
            Uuid::parse_str("2a9c4b7d-5e3f-4c8a-b1d2-9e6f7a8b0c02")?,
            "ST0002",
            "Jules Moreno",
            "jules.moreno@campus.edu",
            "3",
            Some(2.1),
        ),
        (
            Uuid::parse_str("c3d8e9f0-1a2b-4c5d-8e7f-6a5b4c3d2e03")?,
            "ST0003",
            "Kiara Patel",
            "kiara.patel@campus.edu",
            "1",
            None,
        ),
        (
            Uuid::parse_str("9b8a7c6d-5e4f-4a3b-9c2d-1e0f9a8b7c04")?,
            "ST0004",
            "Tomas Okafor",
            "tomas.okafor@campus.edu",
            "4",
            Some(3.8),
        ),
    ];

    for (id, number, name, email, year, gpa) in students {
        sqlx::query(
            r#"
            INSERT INTO gradecast.students (id, student_number, full_name, email, year_of_study, gpa)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                year_of_study = EXCLUDED.year_of_study,
                gpa = EXCLUDED.gpa
            "#,
        )
        .bind(id)
        .bind(number)
        .bind(name)
        .bind(email)
        .bind(year)
        .bind(gpa)
        .execute(pool)
        .await?;
    }

    let courses = vec![
        ("CS101", "Intro to Programming", 3, "beginner"),
        ("MA201", "Linear Algebra", 4, "intermediate"),
        ("CS301", "Advanced Algorithms", 4, "advanced"),
        ("ST150", "Statistics I", 3, "beginner"),
        ("PH210", "Classical Mechanics", 4, "intermediate"),
    ];

    for (code, name, credits, difficulty) in courses {
        sqlx::query(
            r#"
            INSERT INTO gradecast.courses (id, code, name, credits, difficulty_level)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO UPDATE
            SET name = EXCLUDED.name,
                credits = EXCLUDED.credits,
                difficulty_level = EXCLUDED.difficulty_level
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .bind(credits)
        .bind(difficulty)
        .execute(pool)
        .await?;
    }

    let assessments = vec![
        ("CS101", "Midterm Exam", 100.0_f64),
        ("CS101", "Problem Set 1", 50.0),
        ("MA201", "Midterm Exam", 100.0),
        ("MA201", "Problem Set 1", 40.0),
        ("CS301", "Midterm Exam", 100.0),
        ("CS301", "Project Proposal", 20.0),
        ("ST150", "Midterm Exam", 100.0),
        ("ST150", "Lab Quiz", 25.0),
        ("PH210", "Midterm Exam", 100.0),
        ("PH210", "Problem Set 1", 60.0),
    ];

    for (code, title, total_marks) in assessments {
        sqlx::query(
            r#"
            INSERT INTO gradecast.assessments (id, course_id, title, total_marks)
            SELECT $1, id, $2, $3 FROM gradecast.courses WHERE code = $4
            ON CONFLICT (course_id, title) DO UPDATE SET total_marks = EXCLUDED.total_marks
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(total_marks)
        .bind(code)
        .execute(pool)
        .await?;
    }

    // Finished enrollments double as training labels.
    let finished = vec![
        ("avery.lee@campus.edu", "CS101", "completed", 82.0_f64),
        ("avery.lee@campus.edu", "MA201", "completed", 75.0),
        ("avery.lee@campus.edu", "ST150", "completed", 88.0),
        ("jules.moreno@campus.edu", "CS101", "completed", 58.0),
        ("jules.moreno@campus.edu", "ST150", "failed", 47.0),
        ("jules.moreno@campus.edu", "PH210", "completed", 61.0),
        ("kiara.patel@campus.edu", "CS101", "completed", 71.0),
        ("kiara.patel@campus.edu", "MA201", "completed", 66.0),
        ("kiara.patel@campus.edu", "PH210", "completed", 73.0),
        ("tomas.okafor@campus.edu", "CS101", "completed", 93.0),
        ("tomas.okafor@campus.edu", "MA201", "completed", 89.0),
        ("tomas.okafor@campus.edu", "ST150", "completed", 91.0),
    ];
    let finished_start = NaiveDate::from_ymd_opt(2025, 9, 1).context("invalid date")?;

    for (email, code, status, final_grade) in &finished {
        upsert_enrollment(pool, email, code, finished_start, status, Some(*final_grade), false)
            .await?;

        // Published grades proportional to the final result, so historical
        // features line up with the labels they feed.
        sqlx::query(
            r#"
            INSERT INTO gradecast.grades (id, student_id, assessment_id, marks_obtained, is_published)
            SELECT gen_random_uuid(), st.id, a.id, a.total_marks * $1 / 100.0, TRUE
            FROM gradecast.students st, gradecast.assessments a
            JOIN gradecast.courses c ON c.id = a.course_id
            WHERE st.email = $2 AND c.code = $3
            ON CONFLICT (student_id, assessment_id) DO UPDATE
            SET marks_obtained = EXCLUDED.marks_obtained, is_published = TRUE
            "#,
        )
        .bind(final_grade)
        .bind(email)
        .bind(code)
        .execute(pool)
        .await?;
    }

    let active = vec![
        ("avery.lee@campus.edu", "CS301"),
        ("jules.moreno@campus.edu", "MA201"),
        ("kiara.patel@campus.edu", "CS301"),
        ("tomas.okafor@campus.edu", "PH210"),
    ];
    let active_start = NaiveDate::from_ymd_opt(2026, 1, 12).context("invalid date")?;

    for (email, code) in &active {
        upsert_enrollment(pool, email, code, active_start, "enrolled", None, true).await?;
    }

    let current_grades = vec![
        ("avery.lee@campus.edu", "CS301", "Midterm Exam", 54.0_f64, true),
        ("avery.lee@campus.edu", "CS301", "Project Proposal", 15.0, false),
        ("jules.moreno@campus.edu", "MA201", "Midterm Exam", 49.0, true),
        ("jules.moreno@campus.edu", "MA201", "Problem Set 1", 20.0, false),
        ("kiara.patel@campus.edu", "CS301", "Midterm Exam", 68.0, true),
        ("kiara.patel@campus.edu", "CS301", "Project Proposal", 17.0, false),
        ("tomas.okafor@campus.edu", "PH210", "Midterm Exam", 88.0, true),
        ("tomas.okafor@campus.edu", "PH210", "Problem Set 1", 50.0, false),
    ];

    for (email, code, title, marks, published) in current_grades {
        sqlx::query(
            r#"
            INSERT INTO gradecast.grades (id, student_id, assessment_id, marks_obtained, is_published)
            SELECT gen_random_uuid(), st.id, a.id, $1, $2
            FROM gradecast.students st, gradecast.assessments a
            JOIN gradecast.courses c ON c.id = a.course_id
            WHERE st.email = $3 AND c.code = $4 AND a.title = $5
            ON CONFLICT (student_id, assessment_id) DO UPDATE
            SET marks_obtained = EXCLUDED.marks_obtained, is_published = EXCLUDED.is_published
            "#,
        )
        .bind(marks)
        .bind(published)
        .bind(email)
        .bind(code)
        .bind(title)
        .execute(pool)
        .await?;
    }

    // Twelve sessions per active enrollment, every third day. Only
    // `present` counts toward the extractor's attendance rate.
    let attendance: Vec<(&str, &str, [&str; 12])> = vec![
        (
            "avery.lee@campus.edu",
            "CS301",
            [
                "present", "absent", "late", "absent", "present", "absent", "present", "excused",
                "absent", "present", "late", "absent",
            ],
        ),
        (
            "jules.moreno@campus.edu",
            "MA201",
            [
                "present", "late", "present", "absent", "present", "present", "late", "present",
                "absent", "present", "present", "excused",
            ],
        ),
        (
            "kiara.patel@campus.edu",
            "CS301",
            [
                "present", "present", "present", "present", "late", "present", "present",
                "present", "present", "present", "present", "present",
            ],
        ),
        (
            "tomas.okafor@campus.edu",
            "PH210",
            [
                "present", "present", "present", "absent", "present", "present", "present",
                "present", "excused", "present", "present", "present",
            ],
        ),
    ];
    let first_session = NaiveDate::from_ymd_opt(2026, 1, 15).context("invalid date")?;

    for (email, code, statuses) in attendance {
        for (i, status) in statuses.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO gradecast.attendance_records (id, student_id, course_id, date, status)
                SELECT gen_random_uuid(), st.id, c.id, $1, $2
                FROM gradecast.students st, gradecast.courses c
                WHERE st.email = $3 AND c.code = $4
                ON CONFLICT (student_id, course_id, date) DO UPDATE SET status = EXCLUDED.status
                "#,
            )
            .bind(first_session + Duration::days(i as i64 * 3))
            .bind(status)
            .bind(email)
            .bind(code)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

async fn upsert_enrollment(
    pool: &PgPool,
    email: &str,
    code: &str,
    enrollment_date: NaiveDate,
    status: &str,
    final_grade: Option<f64>,
    is_active: bool,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO gradecast.enrollments
        (id, student_id, course_id, enrollment_date, status, final_grade, is_active)
        SELECT gen_random_uuid(), st.id, c.id, $1, $2, $3, $4
        FROM gradecast.students st, gradecast.courses c
        WHERE st.email = $5 AND c.code = $6
        ON CONFLICT (student_id, course_id) DO UPDATE
        SET status = EXCLUDED.status,
            final_grade = EXCLUDED.final_grade,
            is_active = EXCLUDED.is_active
        "#,
    )
    .bind(enrollment_date)
    .bind(status)
    .bind(final_grade)
    .bind(is_active)
    .bind(email)
    .bind(code)
    .execute(pool)
    .await?;

    Ok(())
}
