//! Structured perceptron training
//!
//! Sentences are visited in a fixed order, one decode per sentence per
//! epoch. When the decoder's action sequence differs from the gold prefix
//! of the same length, every gold action from the first divergence on is
//! rewarded and every predicted action from that point is penalized.

use serde::{Deserialize, Serialize};

use cdr_core::{CdrError, JointAnnotation, PerceptronConfig, Result, Sentence};

use crate::alphabet::{FeatureAlphabet, FeatureId};
use crate::decoder::{replay, BeamDecoder, DecodeOutcome};
use crate::features::FeatureSet;
use crate::hypothesis::{gold_actions, Action};
use crate::mesh::MeshResolver;
use crate::model::{LabelSet, Perceptron, WeightAverager};

/// A sentence paired with its gold joint annotation
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingInstance {
    pub sentence: Sentence,
    pub gold: JointAnnotation,
    actions: Vec<Action>,
}

impl TrainingInstance {
    /// Fails when the gold segments do not partition the sentence or a gold
    /// relation falls outside the candidate entity pairs
    pub fn new(sentence: Sentence, gold: JointAnnotation) -> Result<Self> {
        if !gold.is_complete_partition(sentence.len()) {
            return Err(CdrError::InvalidInput(format!(
                "gold segments do not partition a sentence of {} tokens",
                sentence.len()
            )));
        }
        for relation in &gold.relations {
            let valid = relation.entity2 < relation.entity1
                && gold
                    .segments
                    .get(relation.entity1)
                    .is_some_and(|s| s.is_entity())
                && gold.segments[relation.entity2].is_entity();
            if !valid {
                return Err(CdrError::InvalidInput(format!(
                    "gold relation between segments {} and {} is not an entity pair",
                    relation.entity1, relation.entity2
                )));
            }
        }

        let actions = gold_actions(&gold);
        Ok(Self {
            sentence,
            gold,
            actions,
        })
    }

    pub fn gold_actions(&self) -> &[Action] {
        &self.actions
    }
}

/// What one training step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Prediction matched gold
    Correct,
    /// Weights changed; `early` when decoding stopped before completion
    Updated { early: bool },
}

/// Per-epoch counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub instances: usize,
    pub updates: usize,
    pub early_updates: usize,
}

/// Everything needed to decode with the trained weights
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model: Perceptron,
    pub alphabet: FeatureAlphabet,
    pub features: FeatureSet,
    pub reports: Vec<EpochReport>,
}

/// Drives epochs of decode-compare-update
pub struct Trainer<'a> {
    config: PerceptronConfig,
    labels: LabelSet,
    features: FeatureSet,
    resolver: &'a dyn MeshResolver,
}

impl<'a> Trainer<'a> {
    /// Rejects invalid configurations before any decoding
    pub fn new(
        config: PerceptronConfig,
        features: FeatureSet,
        resolver: &'a dyn MeshResolver,
    ) -> Result<Self> {
        config.validate()?;
        let labels = LabelSet::from_config(&config)?;
        Ok(Self {
            config,
            labels,
            features,
            resolver,
        })
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Intern the features of every gold action, then freeze
    pub fn build_alphabet(&self, instances: &[TrainingInstance]) -> Result<FeatureAlphabet> {
        let mut alphabet = FeatureAlphabet::new();
        for instance in instances {
            if let Some(action) = instance
                .gold_actions()
                .iter()
                .find(|a| !self.labels.contains(**a))
            {
                return Err(CdrError::InvalidInput(format!(
                    "gold action {action} uses a type that is not configured"
                )));
            }
            replay(
                &self.features,
                &instance.sentence,
                self.resolver,
                instance.gold_actions(),
                |descriptors| alphabet.intern_all(descriptors),
            )?;
        }
        alphabet.freeze();
        tracing::info!(
            "Built feature alphabet: {} features from {} sentences",
            alphabet.len(),
            instances.len()
        );
        Ok(alphabet)
    }

    /// Train for the configured number of epochs
    pub fn train(&self, instances: &[TrainingInstance]) -> Result<TrainedModel> {
        let alphabet = self.build_alphabet(instances)?;
        let mut model = Perceptron::new(self.labels.clone(), alphabet.len());
        let mut averager = self.config.averaged.then(|| WeightAverager::new(&model));
        let mut reports = Vec::with_capacity(self.config.epochs);

        for epoch in 1..=self.config.epochs {
            let mut report = EpochReport {
                epoch,
                instances: instances.len(),
                updates: 0,
                early_updates: 0,
            };
            for instance in instances {
                match self.train_step(&mut model, &alphabet, instance, averager.as_mut())? {
                    StepOutcome::Correct => {}
                    StepOutcome::Updated { early } => {
                        report.updates += 1;
                        if early {
                            report.early_updates += 1;
                        }
                    }
                }
                if let Some(averager) = averager.as_mut() {
                    averager.tick();
                }
            }

            tracing::info!(
                "Epoch {}/{}: {} updates ({} early) over {} sentences",
                epoch,
                self.config.epochs,
                report.updates,
                report.early_updates,
                report.instances
            );
            reports.push(report);

            if self.config.stop_on_convergence && report.updates == 0 {
                tracing::info!("Converged after epoch {}", epoch);
                break;
            }
        }

        if let Some(averager) = averager {
            model = averager.average(&model);
        }
        Ok(TrainedModel {
            model,
            alphabet,
            features: self.features.clone(),
            reports,
        })
    }

    /// Decode one instance and update on mismatch
    ///
    /// Both action sequences are replayed before the first weight changes,
    /// so a failure leaves the model untouched.
    pub fn train_step(
        &self,
        model: &mut Perceptron,
        alphabet: &FeatureAlphabet,
        instance: &TrainingInstance,
        mut averager: Option<&mut WeightAverager>,
    ) -> Result<StepOutcome> {
        let gold = instance.gold_actions();
        let outcome = {
            let decoder = BeamDecoder::new(
                model,
                alphabet,
                &self.features,
                self.resolver,
                self.config.beam_size,
            )?
            .with_relation_candidates(self.config.relation_candidates);
            if self.config.early_update {
                decoder.decode_with_gold(&instance.sentence, gold)?
            } else {
                DecodeOutcome::Complete(decoder.decode(&instance.sentence)?)
            }
        };

        let early = outcome.is_early_stop();
        let (predicted, gold_prefix) = match outcome {
            DecodeOutcome::Complete(h) => (h, gold.len()),
            DecodeOutcome::EarlyStop {
                predicted,
                gold_prefix,
            } => (predicted, gold_prefix),
        };
        let gold = &gold[..gold_prefix];
        if predicted.follows(gold) {
            return Ok(StepOutcome::Correct);
        }
        if early {
            tracing::debug!(
                "Early update after {} of {} gold actions",
                gold_prefix,
                instance.gold_actions().len()
            );
        }

        let lookup =
            |descriptors: &[String]| -> Result<Vec<FeatureId>> { Ok(alphabet.lookup_all(descriptors)) };
        let gold_steps = replay(&self.features, &instance.sentence, self.resolver, gold, lookup)?;
        let predicted_steps = replay(
            &self.features,
            &instance.sentence,
            self.resolver,
            &predicted.actions,
            lookup,
        )?;

        let diverge = gold
            .iter()
            .zip(&predicted.actions)
            .take_while(|(g, p)| g == p)
            .count();

        let mut plan = Vec::new();
        for (ids, action) in &gold_steps[diverge..] {
            plan.push((model.slots(ids, *action)?, 1.0));
        }
        for (ids, action) in &predicted_steps[diverge..] {
            plan.push((model.slots(ids, *action)?, -1.0));
        }

        for (slots, delta) in &plan {
            model.apply(slots, *delta);
            if let Some(averager) = averager.as_deref_mut() {
                averager.record(slots, *delta);
            }
        }
        Ok(StepOutcome::Updated { early })
    }
}
