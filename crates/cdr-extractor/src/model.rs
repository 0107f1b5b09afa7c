//! Perceptron model
//!
//! Dense weight table keyed by `(feature id, action label)`. Labels are the
//! configured actions in canonical enumeration order; that order is also the
//! decoder's tie-break order.

use serde::{Deserialize, Serialize};

use cdr_core::{CdrError, EntityType, PerceptronConfig, RelationType, Result};

use crate::alphabet::FeatureId;
use crate::hypothesis::Action;

/// The action labels a model scores, in canonical order
///
/// Segmentation labels come first: `Begin(Empty)`, `Begin(T)` per entity
/// type, then `Extend`. Relation labels follow: `NoLink`, then `Link(R)` per
/// relation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSet {
    labels: Vec<Action>,
    segmentation_len: usize,
}

impl LabelSet {
    pub fn new(entity_types: &[EntityType], relation_types: &[RelationType]) -> Self {
        let mut labels = vec![Action::Begin(EntityType::Empty)];
        labels.extend(
            entity_types
                .iter()
                .filter(|t| !t.is_empty())
                .map(|t| Action::Begin(*t)),
        );
        labels.push(Action::Extend);
        let segmentation_len = labels.len();

        labels.push(Action::NoLink);
        labels.extend(relation_types.iter().map(|r| Action::Link(*r)));

        Self {
            labels,
            segmentation_len,
        }
    }

    pub fn from_config(config: &PerceptronConfig) -> Result<Self> {
        Ok(Self::new(&config.entity_types()?, &config.relation_types()?))
    }

    /// `Begin(Empty)`, `Begin(T)`…, `Extend`
    pub fn segmentation_actions(&self) -> &[Action] {
        &self.labels[..self.segmentation_len]
    }

    /// `NoLink`, `Link(R)`…
    pub fn relation_actions(&self) -> &[Action] {
        &self.labels[self.segmentation_len..]
    }

    /// Position of `action` in canonical order
    pub fn index(&self, action: Action) -> Option<usize> {
        self.labels.iter().position(|a| *a == action)
    }

    pub fn contains(&self, action: Action) -> bool {
        self.index(action).is_some()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Structured perceptron weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perceptron {
    labels: LabelSet,
    num_features: usize,
    weights: Vec<f64>,
}

impl Perceptron {
    /// Zero weights for `num_features` features under every label
    pub fn new(labels: LabelSet, num_features: usize) -> Self {
        let weights = vec![0.0; num_features * labels.len()];
        Self {
            labels,
            num_features,
            weights,
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    fn slot(&self, feature: FeatureId, label: usize) -> Option<usize> {
        let feature = feature as usize;
        (feature < self.num_features).then(|| feature * self.labels.len() + label)
    }

    /// Weight slots touched by `features` under `action`
    ///
    /// Fails on labels the model does not know or feature ids outside the
    /// alphabet it was sized for.
    pub fn slots(&self, features: &[FeatureId], action: Action) -> Result<Vec<usize>> {
        let label = self
            .labels
            .index(action)
            .ok_or_else(|| CdrError::InvalidInput(format!("action {action} is not a model label")))?;
        features
            .iter()
            .map(|&f| {
                self.slot(f, label).ok_or_else(|| {
                    CdrError::InvalidInput(format!(
                        "feature id {f} outside model of {} features",
                        self.num_features
                    ))
                })
            })
            .collect()
    }

    /// Sum of weights of `features` under `action`
    ///
    /// Unknown labels and out-of-range ids contribute nothing.
    pub fn score(&self, features: &[FeatureId], action: Action) -> f64 {
        let Some(label) = self.labels.index(action) else {
            return 0.0;
        };
        features
            .iter()
            .filter_map(|&f| self.slot(f, label))
            .map(|slot| self.weights[slot])
            .sum()
    }

    /// Add `delta` to each feature's weight under `action`
    pub fn update(&mut self, features: &[FeatureId], action: Action, delta: f64) -> Result<()> {
        let slots = self.slots(features, action)?;
        self.apply(&slots, delta);
        Ok(())
    }

    /// Add `delta` at precomputed slots
    pub fn apply(&mut self, slots: &[usize], delta: f64) {
        for &slot in slots {
            self.weights[slot] += delta;
        }
    }

    pub fn weight(&self, feature: FeatureId, action: Action) -> f64 {
        self.labels
            .index(action)
            .and_then(|label| self.slot(feature, label))
            .map(|slot| self.weights[slot])
            .unwrap_or(0.0)
    }
}

/// Lazy weight averaging
///
/// Each update at step `c` also adds `c * delta` to a running total; the
/// averaged weights are `w - totals / c` once training ends.
#[derive(Debug, Clone)]
pub struct WeightAverager {
    totals: Vec<f64>,
    step: f64,
}

impl WeightAverager {
    pub fn new(model: &Perceptron) -> Self {
        Self {
            totals: vec![0.0; model.weights.len()],
            step: 1.0,
        }
    }

    pub fn record(&mut self, slots: &[usize], delta: f64) {
        for &slot in slots {
            self.totals[slot] += self.step * delta;
        }
    }

    /// Advance one training instance
    pub fn tick(&mut self) {
        self.step += 1.0;
    }

    pub fn average(&self, model: &Perceptron) -> Perceptron {
        let weights = model
            .weights
            .iter()
            .zip(&self.totals)
            .map(|(w, total)| w - total / self.step)
            .collect();
        Perceptron {
            labels: model.labels.clone(),
            num_features: model.num_features,
            weights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelSet {
        LabelSet::new(
            &[EntityType::Disease, EntityType::Chemical],
            &[RelationType::Cid],
        )
    }

    #[test]
    fn test_label_order_is_canonical() {
        let labels = labels();
        assert_eq!(
            labels.segmentation_actions(),
            &[
                Action::Begin(EntityType::Empty),
                Action::Begin(EntityType::Disease),
                Action::Begin(EntityType::Chemical),
                Action::Extend,
            ]
        );
        assert_eq!(
            labels.relation_actions(),
            &[Action::NoLink, Action::Link(RelationType::Cid)]
        );
        assert_eq!(labels.len(), 6);
    }

    #[test]
    fn test_score_and_update() {
        let mut model = Perceptron::new(labels(), 3);
        let begin = Action::Begin(EntityType::Chemical);

        model.update(&[0, 2], begin, 1.0).unwrap();
        model.update(&[2], begin, 1.0).unwrap();
        model.update(&[2], Action::Extend, -1.0).unwrap();

        assert_eq!(model.score(&[0, 1, 2], begin), 3.0);
        assert_eq!(model.score(&[2], Action::Extend), -1.0);
        assert_eq!(model.weight(2, begin), 2.0);
        // out-of-range ids contribute zero when scoring
        assert_eq!(model.score(&[7], begin), 0.0);
    }

    #[test]
    fn test_update_rejects_unknown_label_without_mutation() {
        let labels = LabelSet::new(&[EntityType::Disease], &[RelationType::Cid]);
        let mut model = Perceptron::new(labels, 2);
        let before = model.clone();

        assert!(model
            .update(&[0], Action::Begin(EntityType::Chemical), 1.0)
            .is_err());
        assert!(model.update(&[0, 9], Action::Extend, 1.0).is_err());
        assert_eq!(model, before);
    }

    #[test]
    fn test_averaging() {
        let mut model = Perceptron::new(labels(), 1);
        let mut averager = WeightAverager::new(&model);
        let slots = model.slots(&[0], Action::Extend).unwrap();

        // +1 on the first of two instances
        model.apply(&slots, 1.0);
        averager.record(&slots, 1.0);
        averager.tick();
        averager.tick();

        let averaged = averager.average(&model);
        assert!((averaged.weight(0, Action::Extend) - 1.0 + 1.0 / 3.0).abs() < 1e-12);
    }
}
