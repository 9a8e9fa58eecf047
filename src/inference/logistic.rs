//! Native logistic-regression backend.
//!
//! Model file format:
//!
//! ```toml
//! weights = [0.0, ...]   # one per feature, 17 in total
//! bias = -2.5
//! threshold = 0.5        # optional
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Classifier, Label};
use crate::pipeline::features::{FeatureVector, FEATURE_COUNT};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse model file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Model has {found} weights, expected {expected}")]
    WeightCount { found: usize, expected: usize },

    #[error("Threshold {0} is outside (0, 1)")]
    Threshold(f64),

    #[error("Model contains non-finite parameters")]
    NonFinite,
}

fn default_threshold() -> f64 {
    0.5
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl LogisticModel {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.weights.len() != FEATURE_COUNT {
            return Err(ModelError::WeightCount {
                found: self.weights.len(),
                expected: FEATURE_COUNT,
            });
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(ModelError::Threshold(self.threshold));
        }
        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        Ok(())
    }

    /// Sigmoid of the weighted sum.
    pub fn score(&self, features: &FeatureVector) -> f64 {
        let z = self
            .weights
            .iter()
            .zip(features.values())
            .fold(self.bias, |acc, (w, x)| acc + w * x);
        1.0 / (1.0 + (-z).exp())
    }
}

#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    model: LogisticModel,
    classified: u64,
}

impl LogisticClassifier {
    pub fn new(model: LogisticModel) -> Result<Self, ModelError> {
        model.validate()?;
        Ok(Self {
            model,
            classified: 0,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ModelError> {
        let model: LogisticModel = toml::from_str(content)?;
        Self::new(model)
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        debug!("Reading inference model from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

impl Classifier for LogisticClassifier {
    fn classify(&mut self, features: &FeatureVector) -> Label {
        let score = self.model.score(features);
        self.classified += 1;
        trace!("Logistic score {:.4} (#{})", score, self.classified);

        if score.is_nan() {
            Label::Unknown
        } else if score > self.model.threshold {
            Label::GestureDetected
        } else {
            Label::NoGesture
        }
    }

    fn name(&self) -> &str {
        "logistic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::features::BUTTON_FLAGS;

    // Fires when A is held
    fn a_button_model() -> LogisticModel {
        let mut weights = vec![0.0; FEATURE_COUNT];
        weights[BUTTON_FLAGS] = 8.0;
        LogisticModel {
            weights,
            bias: -4.0,
            threshold: 0.5,
        }
    }

    #[test]
    fn classifies_by_threshold() {
        let mut classifier = LogisticClassifier::new(a_button_model()).unwrap();

        let idle = FeatureVector([0.0; FEATURE_COUNT]);
        assert_eq!(classifier.classify(&idle), Label::NoGesture);

        let mut values = [0.0; FEATURE_COUNT];
        values[BUTTON_FLAGS] = 1.0;
        assert_eq!(classifier.classify(&FeatureVector(values)), Label::GestureDetected);
    }

    #[test]
    fn zero_model_scores_one_half() {
        let model = LogisticModel {
            weights: vec![0.0; FEATURE_COUNT],
            bias: 0.0,
            threshold: 0.5,
        };
        assert_eq!(model.score(&FeatureVector([0.3; FEATURE_COUNT])), 0.5);
    }

    #[test]
    fn parses_toml_with_default_threshold() {
        let weights = vec!["0.5"; FEATURE_COUNT].join(", ");
        let mut classifier =
            LogisticClassifier::from_toml(&format!("weights = [{}]\nbias = -1.0", weights)).unwrap();

        // sigmoid(-1.0) and sigmoid(-0.15) both stay under the 0.5 default
        assert_eq!(
            classifier.classify(&FeatureVector([0.0; FEATURE_COUNT])),
            Label::NoGesture
        );
        assert_eq!(
            classifier.classify(&FeatureVector([0.1; FEATURE_COUNT])),
            Label::NoGesture
        );
        assert_eq!(
            classifier.classify(&FeatureVector([1.0; FEATURE_COUNT])),
            Label::GestureDetected
        );
    }

    #[test]
    fn rejects_wrong_weight_count() {
        let err = LogisticClassifier::from_toml("weights = [1.0, 2.0]\nbias = 0.0").unwrap_err();
        assert!(matches!(
            err,
            ModelError::WeightCount {
                found: 2,
                expected: FEATURE_COUNT
            }
        ));
    }

    #[test]
    fn rejects_degenerate_threshold() {
        let mut model = a_button_model();
        model.threshold = 1.0;
        assert!(matches!(
            LogisticClassifier::new(model),
            Err(ModelError::Threshold(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            LogisticClassifier::from_toml("weights = \"nope\""),
            Err(ModelError::Parse(_))
        ));
    }
}
