use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::PredictionRow;

struct FactorSummary {
    label: String,
    count: usize,
}

fn summarize_factors(predictions: &[PredictionRow]) -> Vec<FactorSummary> {
    let mut map: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for prediction in predictions.iter().filter(|p| p.at_risk) {
        for factor in &prediction.risk_factors {
            *map.entry(factor.clone()).or_insert(0) += 1;
        }
    }

    let mut summaries: Vec<FactorSummary> = map
        .into_iter()
        .map(|(label, count)| FactorSummary { label, count })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    summaries
}

pub fn build_report(generated_on: NaiveDate, predictions: &[PredictionRow]) -> String {
    let at_risk: Vec<&PredictionRow> = predictions.iter().filter(|p| p.at_risk).collect();
    let summaries = summarize_factors(predictions);

    let mut output = String::new();
    let model_version = predictions
        .first()
        .map(|p| p.model_version.as_str())
        .unwrap_or("none");

    let _ = writeln!(output, "# Performance Prediction Report");
    let _ = writeln!(
        output,
        "Generated {} (model {})",
        generated_on, model_version
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");

    if predictions.is_empty() {
        let _ = writeln!(output, "No predictions on file. Run predict-all first.");
    } else {
        let average: f64 = predictions.iter().map(|p| p.predicted_grade).sum::<f64>()
            / predictions.len() as f64;
        let _ = writeln!(output, "- {} predictions on file", predictions.len());
        let _ = writeln!(output, "- {} students flagged at risk", at_risk.len());
        let _ = writeln!(output, "- average predicted grade {:.1}", average);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Factor Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No risk factors among flagged students.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(output, "- {}: {} students", summary.label, summary.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## At-Risk Students");

    if at_risk.is_empty() {
        let _ = writeln!(output, "No students currently flagged at risk.");
    } else {
        for prediction in at_risk.iter() {
            let _ = writeln!(
                output,
                "- {} ({} {}) predicted {:.2} (confidence {:.2})",
                prediction.student_name,
                prediction.course_code,
                prediction.course_name,
                prediction.predicted_grade,
                prediction.confidence_score
            );
            if !prediction.risk_factors.is_empty() {
                let _ = writeln!(output, "  - factors: {}", prediction.risk_factors.join(", "));
            }
            let _ = writeln!(
                output,
                "  - next steps: {}",
                prediction.recommendations.join("; ")
            );
        }
    }

    output
}
