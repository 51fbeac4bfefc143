use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;

/// Per-column standardization to zero mean and unit variance. Fitted on
/// the training slice only and applied unchanged at inference; the fitted
/// state is persisted next to the model so the pair stays matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: [f64; FEATURE_COUNT],
    stds: [f64; FEATURE_COUNT],
}

impl StandardScaler {
    pub fn fit(rows: &[[f64; FEATURE_COUNT]]) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = [0.0; FEATURE_COUNT];
        for row in rows {
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value / n;
            }
        }

        let mut stds = [0.0; FEATURE_COUNT];
        for row in rows {
            for ((std, value), mean) in stds.iter_mut().zip(row).zip(&means) {
                *std += (value - mean).powi(2) / n;
            }
        }
        for std in &mut stds {
            *std = std.sqrt();
            // A constant column scales to zero offset, not to infinity.
            if *std == 0.0 {
                *std = 1.0;
            }
        }

        Self { means, stds }
    }

    pub fn transform(&self, values: [f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        let mut scaled = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            scaled[i] = (values[i] - self.means[i]) / self.stds[i];
        }
        scaled
    }
}
