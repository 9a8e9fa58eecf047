//! Inference collaborator
//!
//! The pipeline only depends on the [`Classifier`] capability. Two backends
//! exist, picked once at construction by [`load_classifier`]:
//!
//! - [`LogisticClassifier`] - native backend scoring a TOML-described model
//! - [`UnavailableClassifier`] - stub used when no model is configured or it
//!   fails to load; every vector classifies as [`Label::Unavailable`]
//!
//! Unavailability is a normal outcome, never an error for the pipeline.

pub mod logistic;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pipeline::features::FeatureVector;

pub use logistic::{LogisticClassifier, LogisticModel, ModelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    GestureDetected,
    NoGesture,
    /// Backend answered but could not decide.
    Unknown,
    /// No backend available.
    Unavailable,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Label::GestureDetected => "gesture-detected",
            Label::NoGesture => "no-gesture",
            Label::Unknown => "unknown",
            Label::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Opaque function from feature vector to label.
///
/// Called from the consumption thread only, hence `&mut self`.
pub trait Classifier: Send {
    fn classify(&mut self, features: &FeatureVector) -> Label;

    fn name(&self) -> &str;
}

/// Stub backend; always answers [`Label::Unavailable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableClassifier;

impl Classifier for UnavailableClassifier {
    fn classify(&mut self, _features: &FeatureVector) -> Label {
        Label::Unavailable
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    /// TOML model for the logistic backend. `None` selects the stub.
    pub model_path: Option<PathBuf>,
}

/// Picks the backend for `config`, falling back to the stub on any failure.
pub fn load_classifier(config: &InferenceConfig) -> Box<dyn Classifier> {
    let Some(path) = &config.model_path else {
        info!("No inference model configured, gesture classification unavailable");
        return Box::new(UnavailableClassifier);
    };

    match LogisticClassifier::from_file(path) {
        Ok(classifier) => {
            info!("Loaded inference model from {}", path.display());
            Box::new(classifier)
        }
        Err(e) => {
            warn!(
                "Failed to load inference model {}: {}, falling back to stub",
                path.display(),
                e
            );
            Box::new(UnavailableClassifier)
        }
    }
}
