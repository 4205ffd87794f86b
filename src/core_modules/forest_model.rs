// THEORY:
// `ForestModel` is the trained artifact the model-based strategy consults. It is
// an ensemble of binary decision trees stored as plain JSON, so a fitting process
// in any language can produce it. Each tree is a flat node list whose root is
// node 0; a split sends a feature value `<= threshold` left and everything else
// right. Leaves hold per-class vote counts. A prediction normalizes every tree's
// leaf votes into a distribution, averages the distributions, and picks the
// most probable class.
//
// Validation happens once, at load time. A model that passes it can always be
// evaluated: child indices point strictly forward, so every walk ends at a leaf.

use crate::core_modules::classifier::{ClassifierModel, Label};
use crate::core_modules::features::{FEATURE_COUNT, FeatureVector};
use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One node of a decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Split {
        /// Column of `FeatureVector::to_array`.
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        /// One count per class, in the order of `ForestModel::classes`.
        votes: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<Node>,
}

impl DecisionTree {
    /// Walks from the root to a leaf. Only valid on a validated tree.
    fn leaf_for(&self, row: &[f64; FEATURE_COUNT]) -> Option<&[f64]> {
        let mut index = 0;
        loop {
            match self.nodes.get(index)? {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = *row.get(*feature)?;
                    index = if value <= *threshold { *left } else { *right };
                }
                Node::Leaf { votes } => return Some(votes),
            }
        }
    }
}

/// On-disk layout. Class names stay strings until validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForestArtifact {
    classes: Vec<String>,
    trees: Vec<DecisionTree>,
}

/// A validated random-forest classifier over `FeatureVector`s.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestModel {
    classes: Vec<Label>,
    trees: Vec<DecisionTree>,
}

impl ForestModel {
    pub fn new(classes: Vec<Label>, trees: Vec<DecisionTree>) -> Result<Self, ModelError> {
        let model = Self { classes, trees };
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ModelError> {
        let artifact: ForestArtifact = serde_json::from_str(contents)?;
        let classes = artifact
            .classes
            .iter()
            .map(|name| name.parse::<Label>().map_err(ModelError::Invalid))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(classes, artifact.trees)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        let artifact = ForestArtifact {
            classes: self.classes.iter().map(|c| c.as_str().to_string()).collect(),
            trees: self.trees.clone(),
        };
        Ok(serde_json::to_string_pretty(&artifact)?)
    }

    pub fn classes(&self) -> &[Label] {
        &self.classes
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.classes.is_empty() {
            return Err(ModelError::Invalid("model declares no classes".into()));
        }
        if self.trees.is_empty() {
            return Err(ModelError::Invalid("model contains no trees".into()));
        }
        for (tree_index, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(ModelError::Invalid(format!("tree {tree_index} has no nodes")));
            }
            for (node_index, node) in tree.nodes.iter().enumerate() {
                match node {
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if *feature >= FEATURE_COUNT {
                            return Err(ModelError::Invalid(format!(
                                "tree {tree_index} node {node_index}: feature {feature} out of range"
                            )));
                        }
                        if threshold.is_nan() {
                            return Err(ModelError::Invalid(format!(
                                "tree {tree_index} node {node_index}: threshold is NaN"
                            )));
                        }
                        for child in [*left, *right] {
                            if child <= node_index || child >= tree.nodes.len() {
                                return Err(ModelError::Invalid(format!(
                                    "tree {tree_index} node {node_index}: child {child} is not a later node"
                                )));
                            }
                        }
                    }
                    Node::Leaf { votes } => {
                        if votes.len() != self.classes.len() {
                            return Err(ModelError::Invalid(format!(
                                "tree {tree_index} node {node_index}: {} votes for {} classes",
                                votes.len(),
                                self.classes.len()
                            )));
                        }
                        if votes.iter().any(|v| !v.is_finite() || *v < 0.0) {
                            return Err(ModelError::Invalid(format!(
                                "tree {tree_index} node {node_index}: votes must be finite and non-negative"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Averaged class distribution for one feature vector.
    pub fn predict_proba(&self, features: &FeatureVector) -> Vec<f64> {
        let row = features.to_array();
        let mut totals = vec![0.0; self.classes.len()];
        let mut voting_trees = 0usize;
        for tree in &self.trees {
            let Some(votes) = tree.leaf_for(&row) else {
                continue;
            };
            let sum: f64 = votes.iter().sum();
            if sum <= 0.0 {
                continue;
            }
            for (total, vote) in totals.iter_mut().zip(votes) {
                *total += vote / sum;
            }
            voting_trees += 1;
        }
        if voting_trees > 0 {
            for total in &mut totals {
                *total /= voting_trees as f64;
            }
        }
        totals
    }
}

impl ClassifierModel for ForestModel {
    fn classify(&self, features: &FeatureVector) -> (Label, f64) {
        let probabilities = self.predict_proba(features);
        // Ties go to the earlier class.
        let mut best = 0;
        for (index, p) in probabilities.iter().enumerate() {
            if *p > probabilities[best] {
                best = index;
            }
        }
        match (self.classes.get(best), probabilities.get(best)) {
            (Some(label), Some(p)) => (*label, *p),
            _ => (Label::Analyzing, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One stump on `transition_count`: <= 1.5 votes RUNNING, otherwise BLINKING.
    const STUMP: &str = r#"{
        "classes": ["RUNNING", "BLINKING"],
        "trees": [
            { "nodes": [
                { "split": { "feature": 2, "threshold": 1.5, "left": 1, "right": 2 } },
                { "leaf": { "votes": [9.0, 1.0] } },
                { "leaf": { "votes": [0.0, 4.0] } }
            ] },
            { "nodes": [
                { "leaf": { "votes": [1.0, 1.0] } }
            ] }
        ]
    }"#;

    fn with_transitions(transition_count: u32) -> FeatureVector {
        FeatureVector {
            transition_count,
            ..FeatureVector::default()
        }
    }

    #[test]
    fn averages_normalized_leaf_votes() {
        let model = ForestModel::from_json(STUMP).expect("stump should load");
        assert_eq!(model.tree_count(), 2);

        let steady = model.predict_proba(&with_transitions(0));
        assert!((steady[0] - 0.7).abs() < 1e-9);
        assert!((steady[1] - 0.3).abs() < 1e-9);

        let (label, p) = model.classify(&with_transitions(5));
        assert_eq!(label, Label::Blinking);
        assert!((p - 0.75).abs() < 1e-9);
    }

    #[test]
    fn threshold_value_goes_left() {
        let model = ForestModel::from_json(STUMP).expect("stump should load");
        let features = FeatureVector {
            transition_count: 1,
            ..FeatureVector::default()
        };
        assert_eq!(model.classify(&features).0, Label::Running);
    }

    #[test]
    fn rejects_unknown_class_names() {
        let json = STUMP.replace("\"BLINKING\"]", "\"STROBE\"]");
        assert!(matches!(ForestModel::from_json(&json), Err(ModelError::Invalid(_))));
    }

    #[test]
    fn rejects_backward_children() {
        let tree = DecisionTree {
            nodes: vec![
                Node::Leaf { votes: vec![1.0] },
                Node::Split {
                    feature: 0,
                    threshold: 1.0,
                    left: 0,
                    right: 0,
                },
            ],
        };
        assert!(ForestModel::new(vec![Label::Running], vec![tree]).is_err());
    }

    #[test]
    fn rejects_out_of_range_features_and_vote_mismatch() {
        let bad_feature = DecisionTree {
            nodes: vec![
                Node::Split {
                    feature: FEATURE_COUNT,
                    threshold: 1.0,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { votes: vec![1.0] },
                Node::Leaf { votes: vec![1.0] },
            ],
        };
        assert!(ForestModel::new(vec![Label::Running], vec![bad_feature]).is_err());

        let short_votes = DecisionTree {
            nodes: vec![Node::Leaf { votes: vec![1.0] }],
        };
        assert!(ForestModel::new(vec![Label::Running, Label::Blinking], vec![short_votes]).is_err());
        assert!(ForestModel::new(vec![Label::Running], Vec::new()).is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(ForestModel::from_json("[1, 2"), Err(ModelError::Parse(_))));
    }

    #[test]
    fn survives_a_save_and_load() {
        let model = ForestModel::from_json(STUMP).expect("stump should load");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("forest.json");
        std::fs::write(&path, model.to_json().expect("serialize")).expect("write");
        assert_eq!(ForestModel::load(&path).expect("reload"), model);
    }
}
