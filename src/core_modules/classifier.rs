// THEORY:
// The `classifier` module is the decision layer. It receives the feature vector
// of one track window and names what the window shows: a steady running light,
// a blinking hazard light, or not enough / not clear enough evidence yet.
//
// Key architectural principles:
// 1.  **Strategies behind one contract**: rule-based and model-based labelling
//     both implement `ClassificationStrategy`. The choice is made once, when the
//     `Classifier` is built, and never by inspecting a model at runtime.
// 2.  **Rules are always there**: the model-based strategy owns a rule-based one
//     and falls back to it whenever the model is not confident enough. A model
//     that cannot be loaded at all turns the whole classifier rule-based.
// 3.  **Stateless verdicts**: every call looks only at the current window. A label
//     can flip between frames as evidence enters and leaves the window; optional
//     smoothing lives in `smoother`, outside the strategies.

use crate::config::ClassifierConfig;
use crate::core_modules::features::FeatureVector;
use crate::core_modules::forest_model::ForestModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// What a track's window looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    /// Not enough history yet, or an ambiguous pattern.
    #[default]
    Analyzing,
    /// Steadily illuminated.
    Running,
    /// Periodically blinking within the hazard band.
    Blinking,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzing => "ANALYZING",
            Self::Running => "RUNNING",
            Self::Blinking => "BLINKING",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANALYZING" | "UNKNOWN" => Ok(Self::Analyzing),
            "RUNNING" | "RUNNING_LIGHT" => Ok(Self::Running),
            "BLINKING" | "HAZARD" | "HAZARD_LIGHT" => Ok(Self::Blinking),
            other => Err(format!("unknown label `{other}`")),
        }
    }
}

/// A label with the confidence behind it, in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: Label,
    pub confidence: f64,
}

impl Classification {
    pub fn new(label: Label, confidence: f64) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn analyzing() -> Self {
        Self::new(Label::Analyzing, 0.0)
    }
}

/// A trained model, opaque to the engine. Returns a label and its probability.
pub trait ClassifierModel: Send + Sync {
    fn classify(&self, features: &FeatureVector) -> (Label, f64);
}

/// The shared contract of the rule-based and model-based strategies.
pub trait ClassificationStrategy: Send + Sync {
    fn classify(
        &self,
        features: &FeatureVector,
        min_history: usize,
        history_length: usize,
    ) -> Classification;

    fn name(&self) -> &'static str;
}

/// Hand-written thresholds over transition count and blink frequency.
#[derive(Debug, Clone)]
pub struct RuleBasedStrategy {
    config: ClassifierConfig,
}

impl RuleBasedStrategy {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }
}

impl ClassificationStrategy for RuleBasedStrategy {
    fn classify(
        &self,
        features: &FeatureVector,
        min_history: usize,
        history_length: usize,
    ) -> Classification {
        if history_length < min_history {
            return Classification::analyzing();
        }

        // No change, or a single settle transition: steady lamp.
        if features.transition_count <= 1 {
            let steadiness = if features.mean_intensity > 0.0 {
                1.0 - features.std_intensity / features.mean_intensity
            } else {
                0.0
            };
            return Classification::new(Label::Running, steadiness);
        }

        let band = self.config.hazard_band;
        if features.transition_count >= 2 && band.contains(features.blink_frequency) {
            if let Some(limit) = self.config.max_blink_displacement {
                if features.total_displacement > limit {
                    debug!(
                        displacement = features.total_displacement,
                        limit, "blink pattern discounted: light source is moving"
                    );
                    return Classification::analyzing();
                }
            }
            return Classification::new(
                Label::Blinking,
                band.centeredness(features.blink_frequency),
            );
        }

        Classification::analyzing()
    }

    fn name(&self) -> &'static str {
        "rule-based"
    }
}

/// Defers to a trained model, keeping the rules for low-confidence calls.
pub struct ModelBasedStrategy {
    model: Box<dyn ClassifierModel>,
    fallback: RuleBasedStrategy,
    probability_threshold: f64,
}

impl ModelBasedStrategy {
    pub fn new(model: Box<dyn ClassifierModel>, config: ClassifierConfig) -> Self {
        Self {
            model,
            probability_threshold: config.probability_threshold,
            fallback: RuleBasedStrategy::new(config),
        }
    }
}

impl ClassificationStrategy for ModelBasedStrategy {
    fn classify(
        &self,
        features: &FeatureVector,
        min_history: usize,
        history_length: usize,
    ) -> Classification {
        if history_length < min_history {
            return Classification::analyzing();
        }

        let (label, probability) = self.model.classify(features);
        if probability >= self.probability_threshold {
            return Classification::new(label, probability);
        }

        debug!(
            %label,
            probability,
            threshold = self.probability_threshold,
            "model below threshold, using rules"
        );
        self.fallback.classify(features, min_history, history_length)
    }

    fn name(&self) -> &'static str {
        "model-based"
    }
}

/// Labels feature vectors with the strategy chosen at construction.
pub struct Classifier {
    strategy: Box<dyn ClassificationStrategy>,
    min_history: usize,
}

impl Classifier {
    pub fn rule_based(config: ClassifierConfig) -> Self {
        Self {
            min_history: config.min_history_for_classification,
            strategy: Box::new(RuleBasedStrategy::new(config)),
        }
    }

    pub fn with_model(model: Box<dyn ClassifierModel>, config: ClassifierConfig) -> Self {
        Self {
            min_history: config.min_history_for_classification,
            strategy: Box::new(ModelBasedStrategy::new(model, config)),
        }
    }

    /// Builds from config: model-based when `model_path` loads, rule-based otherwise.
    /// A missing or corrupt artifact is a warning, not an error.
    pub fn from_config(config: ClassifierConfig) -> Self {
        let Some(path) = config.model_path.clone() else {
            return Self::rule_based(config);
        };

        match ForestModel::load(&path) {
            Ok(model) => {
                info!(path = %path.display(), trees = model.tree_count(), "loaded classifier model");
                Self::with_model(Box::new(model), config)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "model unavailable, using rule-based classification");
                Self::rule_based(config)
            }
        }
    }

    pub fn classify(&self, features: &FeatureVector, history_length: usize) -> Classification {
        self.strategy
            .classify(features, self.min_history, history_length)
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn min_history(&self) -> usize {
        self.min_history
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("strategy", &self.strategy.name())
            .field("min_history", &self.min_history)
            .finish()
    }
}
