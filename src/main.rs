use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod artifacts;
mod db;
mod features;
mod models;
mod predict;
mod report;
mod risk;
mod scaler;
mod train;

use predict::PredictionOutcome;
use train::TrainOutcome;

#[derive(Parser)]
#[command(name = "gradecast")]
#[command(about = "Student performance prediction pipeline", long_about = None)]
struct Cli {
    /// Directory holding the persisted model and scaler pair
    #[arg(long, default_value = "ml-models", global = true)]
    model_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load deterministic sample data
    Seed,
    /// Import attendance records from a CSV file
    ImportAttendance {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List students with their ids
    ListStudents,
    /// List active courses with their ids
    ListCourses,
    /// Fit the grade model from finished enrollments
    Train,
    /// Predict the final grade for one enrollment
    Predict {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        course: Uuid,
    },
    /// Refresh predictions for every active enrollment
    PredictAll,
    /// List students currently flagged at risk
    AtRisk,
    /// Write a markdown report of at-risk students
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportAttendance { csv } => {
            let summary = db::import_attendance_csv(&pool, &csv).await?;
            println!(
                "Imported {} attendance records from {} ({} skipped).",
                summary.inserted,
                csv.display(),
                summary.skipped
            );
        }
        Commands::ListStudents => {
            for student in db::list_students(&pool).await? {
                let gpa = student
                    .gpa
                    .map(|g| format!("{g:.2}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {} ({}, year {}, gpa {})",
                    student.id, student.full_name, student.student_number, student.year_of_study,
                    gpa
                );
            }
        }
        Commands::ListCourses => {
            for course in db::list_courses(&pool).await? {
                println!(
                    "{} {} - {} ({} credits, {})",
                    course.id, course.code, course.name, course.credits, course.difficulty_level
                );
            }
        }
        Commands::Train => match train::train(&pool, &cli.model_dir).await? {
            TrainOutcome::Trained(result) => {
                println!(
                    "Model trained on {} enrollments ({} train / {} test, mse {:.2}, r2 {:.2}).",
                    result.samples, result.train_rows, result.test_rows, result.mse, result.r2
                );
                println!("Artifacts written to {}.", cli.model_dir.display());
            }
            TrainOutcome::InsufficientData { rows } => {
                println!(
                    "Insufficient training data: {rows} labeled enrollments, need at least {}.",
                    train::MIN_TRAINING_ROWS
                );
            }
        },
        Commands::Predict { student, course } => {
            let Some(artifacts) = predict::shared_artifacts(&cli.model_dir)? else {
                println!("Model not yet trained. Run `gradecast train` first.");
                return Ok(());
            };
            let predictor = predict::Predictor::new(artifacts);

            match predictor.predict(&pool, student, course).await? {
                PredictionOutcome::Predicted(result) => {
                    db::upsert_prediction(&pool, student, course, &result).await?;
                    println!("Predicted grade: {:.2}", result.predicted_grade);
                    println!("Confidence: {:.4}", result.confidence_score);
                    println!("At risk: {}", if result.at_risk { "yes" } else { "no" });
                    if result.risk_factors.is_empty() {
                        println!("Risk factors: none");
                    } else {
                        let labels: Vec<&str> =
                            result.risk_factors.iter().map(|f| f.label()).collect();
                        println!("Risk factors: {}", labels.join(", "));
                    }
                    println!("Recommendations:");
                    for line in &result.recommendations {
                        println!("  - {line}");
                    }
                }
                PredictionOutcome::MissingData(reason) => {
                    println!("Could not generate prediction: {reason}.");
                }
            }
        }
        Commands::PredictAll => {
            let Some(artifacts) = predict::shared_artifacts(&cli.model_dir)? else {
                println!("Model not yet trained. Run `gradecast train` first.");
                return Ok(());
            };
            let predictor = predict::Predictor::new(artifacts);
            let summary = predict::predict_all(&pool, &predictor).await?;
            println!(
                "Updated {} predictions, skipped {} enrollments.",
                summary.updated, summary.skipped
            );
        }
        Commands::AtRisk => {
            let predictions = db::fetch_predictions(&pool, true).await?;
            if predictions.is_empty() {
                println!("No students currently flagged at risk.");
                return Ok(());
            }
            println!("Students at risk:");
            for prediction in predictions.iter() {
                println!(
                    "- {} ({}) in {} {}: predicted {:.2} as of {}",
                    prediction.student_name,
                    prediction.student_email,
                    prediction.course_code,
                    prediction.course_name,
                    prediction.predicted_grade,
                    prediction.predicted_at.date_naive()
                );
                if !prediction.risk_factors.is_empty() {
                    println!("  factors: {}", prediction.risk_factors.join(", "));
                }
            }
        }
        Commands::Report { out } => {
            let predictions = db::fetch_predictions(&pool, false).await?;
            let report = report::build_report(Utc::now().date_naive(), &predictions);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
