//! Feature extraction
//!
//! Feature functions turn a candidate action over a partial hypothesis into
//! sparse string descriptors; the alphabet maps descriptors to ids. Weights
//! are keyed by (feature, action), so descriptors never mention the action
//! label itself.
//!
//! Two closed variants exist:
//! - entity features, scoring BEGIN/EXTEND at the next token
//! - relation features, scoring LINK/NOLINK for the pending entity pair

use serde::{Deserialize, Serialize};

use cdr_core::{CdrError, Result, Segment, Sentence};

use crate::hypothesis::{Action, Hypothesis};

const BOS: &str = "<S>";
const EOS: &str = "</S>";

/// Which decoder phase a feature function serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Entity,
    Relation,
}

/// What is being scored
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    /// Any BEGIN action at the next token
    Begin,
    /// EXTEND of the open span with the next token
    Extend,
    /// A relation decision between two closed entity segments
    Pair {
        later: &'a Segment,
        earlier: &'a Segment,
    },
}

impl Candidate<'_> {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Begin | Self::Extend => Stage::Entity,
            Self::Pair { .. } => Stage::Relation,
        }
    }
}

/// Capability shared by every feature function
///
/// Implementations are pure: they read the hypothesis and sentence and
/// append descriptors to `out`.
pub trait FeatureFunction {
    fn stage(&self) -> Stage;

    fn collect(
        &self,
        state: &Hypothesis,
        sentence: &Sentence,
        candidate: &Candidate<'_>,
        out: &mut Vec<String>,
    );
}

// ============================================================================
// Entity features
// ============================================================================

/// Token identity, shape and local context for segmentation actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFeatures {
    /// Context words on each side
    pub window: usize,
    /// Prefix/suffix length
    pub affix_len: usize,
}

impl Default for EntityFeatures {
    fn default() -> Self {
        Self {
            window: 2,
            affix_len: 3,
        }
    }
}

/// Collapse a word to its character classes, e.g. `5-FU` → `d-X`
pub fn word_shape(word: &str) -> String {
    let mut shape = String::new();
    for c in word.chars() {
        let class = if c.is_uppercase() {
            'X'
        } else if c.is_lowercase() {
            'x'
        } else if c.is_numeric() {
            'd'
        } else {
            c
        };
        if !shape.ends_with(class) {
            shape.push(class);
        }
    }
    shape
}

fn lower_word(sentence: &Sentence, index: isize) -> String {
    if index < 0 {
        return BOS.to_string();
    }
    sentence
        .tokens
        .get(index as usize)
        .map(|t| t.word.to_lowercase())
        .unwrap_or_else(|| EOS.to_string())
}

impl EntityFeatures {
    fn token_features(&self, word: &str, out: &mut Vec<String>) {
        let lower = word.to_lowercase();
        let chars: Vec<char> = lower.chars().collect();
        let affix = self.affix_len.min(chars.len());

        out.push(format!("w={lower}"));
        out.push(format!("shape={}", word_shape(word)));
        out.push(format!("pre={}", chars[..affix].iter().collect::<String>()));
        out.push(format!(
            "suf={}",
            chars[chars.len() - affix..].iter().collect::<String>()
        ));

        if word.chars().next().is_some_and(char::is_uppercase) {
            out.push("cap".to_string());
        }
        if word.chars().any(char::is_numeric) {
            out.push("digit".to_string());
        }
        if word.contains('-') {
            out.push("hyphen".to_string());
        }
        if !word.chars().any(char::is_alphanumeric) {
            out.push("punct".to_string());
        }
    }
}

impl FeatureFunction for EntityFeatures {
    fn stage(&self) -> Stage {
        Stage::Entity
    }

    fn collect(
        &self,
        state: &Hypothesis,
        sentence: &Sentence,
        candidate: &Candidate<'_>,
        out: &mut Vec<String>,
    ) {
        let position = state.tokens_covered();
        let Some(token) = sentence.tokens.get(position) else {
            return;
        };
        let lower = token.word.to_lowercase();
        self.token_features(&token.word, out);

        let here = position as isize;
        for d in 1..=self.window as isize {
            out.push(format!("w-{d}={}", lower_word(sentence, here - d)));
            out.push(format!("w+{d}={}", lower_word(sentence, here + d)));
        }
        out.push(format!(
            "w-1|w={}|{lower}",
            lower_word(sentence, here - 1)
        ));
        out.push(format!(
            "w|w+1={lower}|{}",
            lower_word(sentence, here + 1)
        ));

        match candidate {
            Candidate::Begin => {
                let previous = state
                    .segments
                    .last()
                    .map(|s| s.entity_type.as_str())
                    .unwrap_or(BOS);
                out.push(format!("prev_type={previous}"));
                out.push(format!("prev_type|w={previous}|{lower}"));
            }
            Candidate::Extend => {
                if let Some(open) = state.open_segment() {
                    let last = sentence
                        .tokens
                        .get(open.end)
                        .map(|t| t.word.to_lowercase())
                        .unwrap_or_default();
                    out.push(format!("open_type={}", open.entity_type));
                    out.push(format!("open_type|w={}|{lower}", open.entity_type));
                    out.push(format!("span_last|w={last}|{lower}"));
                    out.push(format!("span_len={}", (open.token_count() + 1).min(5)));
                }
            }
            Candidate::Pair { .. } => {}
        }
    }
}

// ============================================================================
// Relation features
// ============================================================================

/// Types, identifiers and surface/positional relationship of an entity pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationFeatures {
    /// Emit in-between words only when at most this many separate the pair
    pub max_between: usize,
}

impl Default for RelationFeatures {
    fn default() -> Self {
        Self { max_between: 5 }
    }
}

fn distance_bucket(distance: usize) -> &'static str {
    match distance {
        0 => "0",
        1 => "1",
        2 => "2",
        3..=5 => "3-5",
        6..=10 => "6-10",
        _ => "11+",
    }
}

impl FeatureFunction for RelationFeatures {
    fn stage(&self) -> Stage {
        Stage::Relation
    }

    fn collect(
        &self,
        state: &Hypothesis,
        sentence: &Sentence,
        candidate: &Candidate<'_>,
        out: &mut Vec<String>,
    ) {
        let Candidate::Pair { later, earlier } = candidate else {
            return;
        };
        let first_text = earlier.text.to_lowercase();
        let second_text = later.text.to_lowercase();
        let first_id = earlier.mesh.as_deref().unwrap_or("NONE");
        let second_id = later.mesh.as_deref().unwrap_or("NONE");
        let types = format!("{}|{}", earlier.entity_type, later.entity_type);

        out.push(format!("types={types}"));
        out.push(format!("e1={first_text}"));
        out.push(format!("e2={second_text}"));
        out.push(format!("e1|e2={first_text}|{second_text}"));
        out.push(format!("id1={first_id}"));
        out.push(format!("id2={second_id}"));
        out.push(format!("id1|id2={first_id}|{second_id}"));
        out.push(format!("types|id1|id2={types}|{first_id}|{second_id}"));

        let between = later.start.saturating_sub(earlier.end + 1);
        out.push(format!("dist={}", distance_bucket(between)));
        out.push(format!("types|dist={types}|{}", distance_bucket(between)));

        let entities_between = state
            .segments
            .iter()
            .filter(|s| s.is_entity() && s.start > earlier.end && s.end < later.start)
            .count();
        out.push(format!("entities_between={}", entities_between.min(3)));

        if between <= self.max_between {
            for token in &sentence.tokens[earlier.end + 1..later.start] {
                out.push(format!("bw={}", token.word.to_lowercase()));
                out.push(format!("types|bw={types}|{}", token.word.to_lowercase()));
            }
        }
    }
}

// ============================================================================
// Feature set
// ============================================================================

/// The closed set of feature function variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Extractor {
    Entity(EntityFeatures),
    Relation(RelationFeatures),
}

impl FeatureFunction for Extractor {
    fn stage(&self) -> Stage {
        match self {
            Self::Entity(f) => f.stage(),
            Self::Relation(f) => f.stage(),
        }
    }

    fn collect(
        &self,
        state: &Hypothesis,
        sentence: &Sentence,
        candidate: &Candidate<'_>,
        out: &mut Vec<String>,
    ) {
        match self {
            Self::Entity(f) => f.collect(state, sentence, candidate, out),
            Self::Relation(f) => f.collect(state, sentence, candidate, out),
        }
    }
}

/// Ordered collection of feature functions consumed by the decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    extractors: Vec<Extractor>,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::new(vec![
            Extractor::Entity(EntityFeatures::default()),
            Extractor::Relation(RelationFeatures::default()),
        ])
    }
}

impl FeatureSet {
    pub fn new(extractors: Vec<Extractor>) -> Self {
        Self { extractors }
    }

    /// Descriptors from every function serving the candidate's stage
    pub fn descriptors(
        &self,
        state: &Hypothesis,
        sentence: &Sentence,
        candidate: &Candidate<'_>,
    ) -> Vec<String> {
        let stage = candidate.stage();
        let mut out = Vec::new();
        for extractor in self.extractors.iter().filter(|e| e.stage() == stage) {
            extractor.collect(state, sentence, candidate, &mut out);
        }
        out
    }

    /// Descriptors for taking `action` from `state`
    pub fn for_action(
        &self,
        state: &Hypothesis,
        sentence: &Sentence,
        action: Action,
    ) -> Result<Vec<String>> {
        match action {
            Action::Begin(_) => Ok(self.descriptors(state, sentence, &Candidate::Begin)),
            Action::Extend => Ok(self.descriptors(state, sentence, &Candidate::Extend)),
            Action::NoLink | Action::Link(_) => {
                let (i, j) = state.next_pair().ok_or_else(|| {
                    CdrError::IllegalTransition(format!("{action} with no pending entity pair"))
                })?;
                let candidate = Candidate::Pair {
                    later: &state.segments[i],
                    earlier: &state.segments[j],
                };
                Ok(self.descriptors(state, sentence, &candidate))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::NullResolver;
    use cdr_core::EntityType;

    fn sentence() -> Sentence {
        Sentence::from_words(0, &["Aspirin", "causes", "acute", "headache", "."])
    }

    #[test]
    fn test_word_shape() {
        assert_eq!(word_shape("Aspirin"), "Xx");
        assert_eq!(word_shape("5-FU"), "d-X");
        assert_eq!(word_shape("."), ".");
    }

    #[test]
    fn test_begin_features_use_context_and_previous_type() {
        let sentence = sentence();
        let features = FeatureSet::default();
        let mut state = Hypothesis::new();

        let first = features.descriptors(&state, &sentence, &Candidate::Begin);
        assert!(first.contains(&"w=aspirin".to_string()));
        assert!(first.contains(&"w-1=<S>".to_string()));
        assert!(first.contains(&"w+1=causes".to_string()));
        assert!(first.contains(&"prev_type=<S>".to_string()));
        assert!(first.contains(&"cap".to_string()));

        state
            .apply(&sentence, Action::Begin(EntityType::Chemical))
            .unwrap();
        let second = features.descriptors(&state, &sentence, &Candidate::Begin);
        assert!(second.contains(&"prev_type=Chemical".to_string()));
        assert!(!second.iter().any(|f| f.starts_with("open_type")));
    }

    #[test]
    fn test_extend_features_describe_open_span() {
        let sentence = sentence();
        let features = FeatureSet::default();
        let mut state = Hypothesis::new();
        state.apply(&sentence, Action::Begin(EntityType::Chemical)).unwrap();
        state.apply(&sentence, Action::Begin(EntityType::Empty)).unwrap();
        state.apply(&sentence, Action::Begin(EntityType::Disease)).unwrap();

        let extend = features.descriptors(&state, &sentence, &Candidate::Extend);
        assert!(extend.contains(&"open_type=Disease".to_string()));
        assert!(extend.contains(&"span_last|w=acute|headache".to_string()));
        assert!(extend.contains(&"span_len=2".to_string()));
    }

    #[test]
    fn test_relation_features_for_pending_pair() {
        let sentence = sentence();
        let features = FeatureSet::default();
        let mut state = Hypothesis::new();
        for action in [
            Action::Begin(EntityType::Chemical),
            Action::Begin(EntityType::Empty),
            Action::Begin(EntityType::Disease),
            Action::Extend,
            Action::Begin(EntityType::Empty),
        ] {
            state.apply(&sentence, action).unwrap();
        }
        assert!(features.for_action(&state, &sentence, Action::NoLink).is_err());

        state.begin_relation_phase(&NullResolver);
        let pair = features.for_action(&state, &sentence, Action::NoLink).unwrap();
        assert!(pair.contains(&"types=Chemical|Disease".to_string()));
        assert!(pair.contains(&"e1|e2=aspirin|acute headache".to_string()));
        assert!(pair.contains(&"dist=1".to_string()));
        assert!(pair.contains(&"bw=causes".to_string()));
        assert!(pair.contains(&"id1=NONE".to_string()));
        assert!(!pair.iter().any(|f| f.starts_with("w=")));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let sentence = sentence();
        let features = FeatureSet::default();
        let state = Hypothesis::new();
        assert_eq!(
            features.descriptors(&state, &sentence, &Candidate::Begin),
            features.descriptors(&state, &sentence, &Candidate::Begin)
        );
    }
}
