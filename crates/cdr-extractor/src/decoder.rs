//! Joint beam decoder
//!
//! Two sequential phases share one beam and one score scale:
//!
//! 1. Segmentation: one step per token. Every hypothesis branches on
//!    `Begin(T)` for EMPTY and each entity type, plus `Extend` when an
//!    entity span is open.
//! 2. Relation linking: one step per candidate entity pair. Every
//!    hypothesis with a pending pair branches on `NoLink` and each `Link(R)`;
//!    finished hypotheses carry over unchanged.
//!
//! After each step the beam is pruned to `beam_size` by score with a stable
//! sort, so ties go to the hypothesis generated first. Generation follows the
//! beam order, then the canonical label order.

use rayon::prelude::*;

use cdr_core::{CdrError, JointAnnotation, RelationCandidates, Result, Sentence};

use crate::alphabet::{FeatureAlphabet, FeatureId};
use crate::features::{Candidate, FeatureSet};
use crate::hypothesis::{Action, Hypothesis};
use crate::mesh::MeshResolver;
use crate::model::Perceptron;
use crate::JointExtractor;

/// Result of decoding against a gold action sequence
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// Decoding ran to a complete hypothesis
    Complete(Hypothesis),
    /// The gold prefix of length `gold_prefix` fell out of the beam; `predicted`
    /// is the best hypothesis at that step
    EarlyStop {
        predicted: Hypothesis,
        gold_prefix: usize,
    },
}

impl DecodeOutcome {
    pub fn hypothesis(&self) -> &Hypothesis {
        match self {
            Self::Complete(h) => h,
            Self::EarlyStop { predicted, .. } => predicted,
        }
    }

    pub fn is_early_stop(&self) -> bool {
        matches!(self, Self::EarlyStop { .. })
    }
}

/// Beam search over a read-only model
pub struct BeamDecoder<'a> {
    model: &'a Perceptron,
    alphabet: &'a FeatureAlphabet,
    features: &'a FeatureSet,
    resolver: &'a dyn MeshResolver,
    beam_size: usize,
    relation_candidates: RelationCandidates,
}

impl<'a> BeamDecoder<'a> {
    pub fn new(
        model: &'a Perceptron,
        alphabet: &'a FeatureAlphabet,
        features: &'a FeatureSet,
        resolver: &'a dyn MeshResolver,
        beam_size: usize,
    ) -> Result<Self> {
        if beam_size < 1 {
            return Err(cdr_core::ConfigError::InvalidBeamSize(beam_size).into());
        }
        Ok(Self {
            model,
            alphabet,
            features,
            resolver,
            beam_size,
            relation_candidates: RelationCandidates::Beam,
        })
    }

    /// Which phase-1 survivors enter relation linking
    pub fn with_relation_candidates(mut self, relation_candidates: RelationCandidates) -> Self {
        self.relation_candidates = relation_candidates;
        self
    }

    pub fn beam_size(&self) -> usize {
        self.beam_size
    }

    /// Best complete hypothesis for `sentence`
    pub fn decode(&self, sentence: &Sentence) -> Result<Hypothesis> {
        match self.run(sentence, None)? {
            DecodeOutcome::Complete(hypothesis) => Ok(hypothesis),
            DecodeOutcome::EarlyStop { predicted, .. } => Ok(predicted),
        }
    }

    /// Decode with early update against `gold`
    pub fn decode_with_gold(&self, sentence: &Sentence, gold: &[Action]) -> Result<DecodeOutcome> {
        self.run(sentence, Some(gold))
    }

    /// Decode many sentences in parallel
    pub fn decode_all(&self, sentences: &[Sentence]) -> Result<Vec<Hypothesis>> {
        sentences.par_iter().map(|s| self.decode(s)).collect()
    }

    /// Score of an action sequence from the empty state
    pub fn score_actions(&self, sentence: &Sentence, actions: &[Action]) -> Result<f64> {
        let steps = replay(self.features, sentence, self.resolver, actions, |descriptors| {
            Ok(self.alphabet.lookup_all(descriptors))
        })?;
        Ok(steps
            .iter()
            .map(|(ids, action)| self.model.score(ids, *action))
            .sum())
    }

    fn run(&self, sentence: &Sentence, gold: Option<&[Action]>) -> Result<DecodeOutcome> {
        let n = sentence.len();
        let mut beam = vec![Hypothesis::new()];

        for position in 0..n {
            let mut candidates = Vec::with_capacity(beam.len() * 4);
            for hypothesis in &beam {
                self.expand_segmentation(sentence, hypothesis, &mut candidates)?;
            }
            beam = self.prune(candidates);

            if let Some(stop) = early_stop(&beam, gold, position + 1) {
                tracing::debug!("Gold left the beam at token {}", position);
                return Ok(stop);
            }
        }

        for hypothesis in beam.iter_mut() {
            hypothesis.begin_relation_phase(self.resolver);
        }
        if self.relation_candidates == RelationCandidates::Best {
            beam.truncate(1);
            if let Some(stop) = early_stop(&beam, gold, n) {
                return Ok(stop);
            }
        }
        tracing::trace!("Segmentation done, {} hypotheses enter linking", beam.len());

        let mut step = 0;
        while beam.iter().any(|h| h.next_pair().is_some()) {
            let mut candidates = Vec::with_capacity(beam.len() * 2);
            for hypothesis in &beam {
                if hypothesis.next_pair().is_none() {
                    candidates.push(hypothesis.clone());
                } else {
                    self.expand_relation(sentence, hypothesis, &mut candidates)?;
                }
            }
            beam = self.prune(candidates);
            step += 1;

            if let Some(stop) = early_stop(&beam, gold, n + step) {
                tracing::debug!("Gold left the beam at relation step {}", step);
                return Ok(stop);
            }
        }

        // the beam is never empty: Begin(Empty) is always legal
        let best = beam
            .into_iter()
            .next()
            .ok_or_else(|| CdrError::InvalidInput("beam emptied during decoding".to_string()))?;
        Ok(DecodeOutcome::Complete(best))
    }

    fn ids(&self, descriptors: &[String]) -> Vec<FeatureId> {
        self.alphabet.lookup_all(descriptors)
    }

    fn expand_segmentation(
        &self,
        sentence: &Sentence,
        hypothesis: &Hypothesis,
        out: &mut Vec<Hypothesis>,
    ) -> Result<()> {
        let begin = self.ids(&self.features.descriptors(hypothesis, sentence, &Candidate::Begin));
        let extend = match hypothesis.open_segment() {
            Some(_) => Some(self.ids(&self.features.descriptors(
                hypothesis,
                sentence,
                &Candidate::Extend,
            ))),
            None => None,
        };

        for &action in self.model.labels().segmentation_actions() {
            let ids = match action {
                Action::Extend => match &extend {
                    Some(ids) => ids,
                    None => continue,
                },
                _ => &begin,
            };
            let score = self.model.score(ids, action);
            out.push(hypothesis.successor(sentence, action, score)?);
        }
        Ok(())
    }

    fn expand_relation(
        &self,
        sentence: &Sentence,
        hypothesis: &Hypothesis,
        out: &mut Vec<Hypothesis>,
    ) -> Result<()> {
        let Some((i, j)) = hypothesis.next_pair() else {
            return Ok(());
        };
        let candidate = Candidate::Pair {
            later: &hypothesis.segments[i],
            earlier: &hypothesis.segments[j],
        };
        let ids = self.ids(&self.features.descriptors(hypothesis, sentence, &candidate));

        for &action in self.model.labels().relation_actions() {
            let score = self.model.score(&ids, action);
            out.push(hypothesis.successor(sentence, action, score)?);
        }
        Ok(())
    }

    fn prune(&self, mut candidates: Vec<Hypothesis>) -> Vec<Hypothesis> {
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(self.beam_size);
        candidates
    }
}

fn early_stop(beam: &[Hypothesis], gold: Option<&[Action]>, prefix: usize) -> Option<DecodeOutcome> {
    let gold = gold?;
    let prefix = prefix.min(gold.len());
    if beam.iter().any(|h| h.follows(&gold[..prefix])) {
        return None;
    }
    Some(DecodeOutcome::EarlyStop {
        predicted: beam.first()?.clone(),
        gold_prefix: prefix,
    })
}

/// Walk `actions` from the empty state, collecting feature ids per action
///
/// `ids` maps descriptors to ids: interning while the alphabet is built,
/// lookups afterwards. Identifiers are resolved right before the first
/// relation action, as the decoder does between its phases.
pub fn replay<F>(
    features: &FeatureSet,
    sentence: &Sentence,
    resolver: &dyn MeshResolver,
    actions: &[Action],
    mut ids: F,
) -> Result<Vec<(Vec<FeatureId>, Action)>>
where
    F: FnMut(&[String]) -> Result<Vec<FeatureId>>,
{
    let mut state = Hypothesis::new();
    let mut steps = Vec::with_capacity(actions.len());
    for &action in actions {
        if !action.is_segmentation() {
            state.begin_relation_phase(resolver);
        }
        let descriptors = features.for_action(&state, sentence, action)?;
        steps.push((ids(&descriptors)?, action));
        state.apply(sentence, action)?;
    }
    Ok(steps)
}

impl JointExtractor for BeamDecoder<'_> {
    fn extract(&self, sentence: &Sentence) -> Result<JointAnnotation> {
        Ok(self.decode(sentence)?.into())
    }
}
