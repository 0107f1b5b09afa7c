//! Decoder state
//!
//! A [`Hypothesis`] is a partial joint assignment: a gap-free segmentation
//! of a sentence prefix, then (once every token is covered) relation
//! decisions over pairs of closed entity segments. The action trace is kept
//! so that a hypothesis can be compared with the gold action sequence.

use serde::{Deserialize, Serialize};

use cdr_core::{
    CdrError, EntityType, JointAnnotation, RelationEntity, RelationType, Result, Segment,
    Sentence,
};

use crate::mesh::MeshResolver;

// ============================================================================
// Actions
// ============================================================================

/// One decoder transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Close any open span and start a segment of this type at the next token
    Begin(EntityType),
    /// Add the next token to the open entity span
    Extend,
    /// Leave the current pair unrelated
    NoLink,
    /// Relate the current pair
    Link(RelationType),
}

impl Action {
    pub fn is_segmentation(&self) -> bool {
        matches!(self, Self::Begin(_) | Self::Extend)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begin(t) => write!(f, "BEGIN-{t}"),
            Self::Extend => write!(f, "EXTEND"),
            Self::NoLink => write!(f, "NOLINK"),
            Self::Link(r) => write!(f, "LINK-{r}"),
        }
    }
}

/// Candidate entity pairs of a segmentation, in decision order
///
/// Pairs are `(i, j)` with `j < i`, outer index first, both non-EMPTY.
pub fn relation_pairs(segments: &[Segment]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, later) in segments.iter().enumerate() {
        if !later.is_entity() {
            continue;
        }
        for (j, earlier) in segments[..i].iter().enumerate() {
            if earlier.is_entity() {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// The action sequence that produces `annotation` from the empty state
pub fn gold_actions(annotation: &JointAnnotation) -> Vec<Action> {
    let mut actions = Vec::new();
    for segment in &annotation.segments {
        actions.push(Action::Begin(segment.entity_type));
        for _ in segment.start..segment.end {
            actions.push(Action::Extend);
        }
    }
    for (i, j) in relation_pairs(&annotation.segments) {
        let linked = annotation
            .relations
            .iter()
            .find(|r| r.entity1 == i && r.entity2 == j);
        actions.push(match linked {
            Some(r) => Action::Link(r.relation_type),
            None => Action::NoLink,
        });
    }
    actions
}

// ============================================================================
// Hypothesis
// ============================================================================

/// Partial joint assignment with its cumulative score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Segments covering a prefix of the sentence
    pub segments: Vec<Segment>,

    /// Relation decisions made so far
    pub relations: Vec<RelationEntity>,

    /// Sum of local action scores
    pub score: f64,

    /// Actions taken from the empty state
    pub actions: Vec<Action>,

    /// Pending entity pairs; `None` until segmentation is complete
    pairs: Option<Vec<(usize, usize)>>,

    /// Pairs already decided
    pair_cursor: usize,
}

impl Hypothesis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tokens assigned to segments
    pub fn tokens_covered(&self) -> usize {
        self.segments.last().map(|s| s.end + 1).unwrap_or(0)
    }

    /// The last segment, if it is an entity that can still grow
    pub fn open_segment(&self) -> Option<&Segment> {
        self.segments.last().filter(|s| s.is_entity())
    }

    pub fn in_relation_phase(&self) -> bool {
        self.pairs.is_some()
    }

    /// The pair awaiting a relation decision
    pub fn next_pair(&self) -> Option<(usize, usize)> {
        self.pairs.as_ref()?.get(self.pair_cursor).copied()
    }

    /// Segmentation done and every pair decided
    pub fn is_complete(&self) -> bool {
        self.in_relation_phase() && self.next_pair().is_none()
    }

    /// Whether the action trace equals `prefix`
    pub fn follows(&self, prefix: &[Action]) -> bool {
        self.actions == prefix
    }

    /// Close the segmentation: resolve identifiers and enumerate pairs
    pub fn begin_relation_phase(&mut self, resolver: &dyn MeshResolver) {
        if self.in_relation_phase() {
            return;
        }
        for segment in self.segments.iter_mut().filter(|s| s.is_entity()) {
            if segment.mesh.is_none() {
                segment.mesh = resolver.resolve(&segment.text);
            }
        }
        self.pairs = Some(relation_pairs(&self.segments));
        self.pair_cursor = 0;
    }

    /// Apply one action in place
    pub fn apply(&mut self, sentence: &Sentence, action: Action) -> Result<()> {
        match action {
            Action::Begin(entity_type) => {
                let token = self.next_token(sentence, action)?;
                self.segments.push(Segment::from_token(token, entity_type));
            }
            Action::Extend => {
                let position = self.tokens_covered();
                let token = self.next_token(sentence, action)?;
                match self.segments.last_mut().filter(|s| s.is_entity()) {
                    Some(open) => open.extend(token),
                    None => {
                        return Err(CdrError::IllegalTransition(format!(
                            "EXTEND at token {position} with no open entity span"
                        )))
                    }
                }
            }
            Action::NoLink | Action::Link(_) => {
                let (i, j) = self.next_pair().ok_or_else(|| {
                    CdrError::IllegalTransition(format!("{action} with no pending entity pair"))
                })?;
                if let Action::Link(relation_type) = action {
                    self.relations
                        .push(RelationEntity::new(relation_type, i, j));
                }
                self.pair_cursor += 1;
            }
        }
        self.actions.push(action);
        Ok(())
    }

    /// A copy advanced by `action`, adding `local_score`
    pub fn successor(&self, sentence: &Sentence, action: Action, local_score: f64) -> Result<Self> {
        let mut next = self.clone();
        next.apply(sentence, action)?;
        next.score += local_score;
        Ok(next)
    }

    fn next_token<'s>(&self, sentence: &'s Sentence, action: Action) -> Result<&'s cdr_core::Token> {
        if self.in_relation_phase() {
            return Err(CdrError::IllegalTransition(format!(
                "{action} after segmentation was closed"
            )));
        }
        let position = self.tokens_covered();
        sentence.tokens.get(position).ok_or_else(|| {
            CdrError::IllegalTransition(format!(
                "{action} at token {position} beyond sentence of {} tokens",
                sentence.len()
            ))
        })
    }

    /// Segments and relations without search bookkeeping
    pub fn annotation(&self) -> JointAnnotation {
        JointAnnotation {
            segments: self.segments.clone(),
            relations: self.relations.clone(),
        }
    }
}

impl From<Hypothesis> for JointAnnotation {
    fn from(hypothesis: Hypothesis) -> Self {
        JointAnnotation {
            segments: hypothesis.segments,
            relations: hypothesis.relations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshDictionary;

    fn sentence() -> Sentence {
        Sentence::from_words(0, &["Aspirin", "causes", "acute", "headache", "."])
    }

    #[test]
    fn test_apply_builds_gap_free_segments() {
        let sentence = sentence();
        let mut hypothesis = Hypothesis::new();
        for action in [
            Action::Begin(EntityType::Chemical),
            Action::Begin(EntityType::Empty),
            Action::Begin(EntityType::Disease),
            Action::Extend,
            Action::Begin(EntityType::Empty),
        ] {
            hypothesis.apply(&sentence, action).unwrap();
        }

        assert_eq!(hypothesis.tokens_covered(), 5);
        assert_eq!(hypothesis.segments[2].text, "acute headache");
        assert!(hypothesis.annotation().is_complete_partition(5));
    }

    #[test]
    fn test_extend_requires_open_entity() {
        let sentence = sentence();
        let mut hypothesis = Hypothesis::new();
        assert!(hypothesis.apply(&sentence, Action::Extend).is_err());

        hypothesis
            .apply(&sentence, Action::Begin(EntityType::Empty))
            .unwrap();
        assert!(matches!(
            hypothesis.apply(&sentence, Action::Extend),
            Err(CdrError::IllegalTransition(_))
        ));
        assert_eq!(hypothesis.actions.len(), 1);
    }

    #[test]
    fn test_relation_phase_pairs_skip_empty_segments() {
        let sentence = sentence();
        let mut dictionary = MeshDictionary::new();
        dictionary.insert("aspirin", "C1");

        let mut hypothesis = Hypothesis::new();
        for action in [
            Action::Begin(EntityType::Chemical),
            Action::Begin(EntityType::Empty),
            Action::Begin(EntityType::Disease),
            Action::Extend,
            Action::Begin(EntityType::Empty),
        ] {
            hypothesis.apply(&sentence, action).unwrap();
        }
        assert!(hypothesis.apply(&sentence, Action::NoLink).is_err());

        hypothesis.begin_relation_phase(&dictionary);
        assert_eq!(hypothesis.segments[0].mesh.as_deref(), Some("C1"));
        assert_eq!(hypothesis.segments[2].mesh, None);
        assert_eq!(hypothesis.next_pair(), Some((2, 0)));

        hypothesis
            .apply(&sentence, Action::Link(RelationType::Cid))
            .unwrap();
        assert!(hypothesis.is_complete());
        assert_eq!(
            hypothesis.relations,
            vec![RelationEntity::new(RelationType::Cid, 2, 0)]
        );
        assert!(hypothesis
            .apply(&sentence, Action::Begin(EntityType::Empty))
            .is_err());
    }

    #[test]
    fn test_gold_actions_replay_to_annotation() {
        let sentence = sentence();
        let mut disease = Segment::from_token(&sentence.tokens[2], EntityType::Disease);
        disease.extend(&sentence.tokens[3]);
        let annotation = JointAnnotation {
            segments: vec![
                Segment::from_token(&sentence.tokens[0], EntityType::Chemical),
                Segment::from_token(&sentence.tokens[1], EntityType::Empty),
                disease,
                Segment::from_token(&sentence.tokens[4], EntityType::Empty),
            ],
            relations: vec![RelationEntity::new(RelationType::Cid, 2, 0)],
        };

        let actions = gold_actions(&annotation);
        assert_eq!(
            actions,
            vec![
                Action::Begin(EntityType::Chemical),
                Action::Begin(EntityType::Empty),
                Action::Begin(EntityType::Disease),
                Action::Extend,
                Action::Begin(EntityType::Empty),
                Action::Link(RelationType::Cid),
            ]
        );

        let mut hypothesis = Hypothesis::new();
        for (k, action) in actions.iter().enumerate() {
            if k == 5 {
                hypothesis.begin_relation_phase(&MeshDictionary::new());
            }
            hypothesis.apply(&sentence, *action).unwrap();
        }
        assert_eq!(hypothesis.annotation(), annotation);
    }

    #[test]
    fn test_relation_pairs_order() {
        let sentence = Sentence::from_words(0, &["a", "b", "c", "d"]);
        let segments = vec![
            Segment::from_token(&sentence.tokens[0], EntityType::Chemical),
            Segment::from_token(&sentence.tokens[1], EntityType::Disease),
            Segment::from_token(&sentence.tokens[2], EntityType::Empty),
            Segment::from_token(&sentence.tokens[3], EntityType::Disease),
        ];
        assert_eq!(relation_pairs(&segments), vec![(1, 0), (3, 0), (3, 1)]);
    }
}
