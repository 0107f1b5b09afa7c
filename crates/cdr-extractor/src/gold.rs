//! Gold output construction
//!
//! Walks a sentence's tokens against the document's gold mentions: tokens
//! inside the same mention merge into one segment, every other token becomes
//! a one-token EMPTY segment. Gold relations become relation decisions
//! between the sentence's entity segments whose identifiers they link.

use cdr_core::{
    AnnotatedDocument, EntityType, JointAnnotation, PerceptronConfig, RelationEntity,
    RelationType, Result, Segment, Sentence, SentenceRecord,
};

use crate::hypothesis::relation_pairs;

/// Corpus marker for a mention without identifier
const UNRESOLVED: &str = "-1";

/// Builds gold joint annotations for the configured types
#[derive(Debug, Clone)]
pub struct GoldBuilder {
    entity_types: Vec<EntityType>,
    relation_types: Vec<RelationType>,
}

impl GoldBuilder {
    /// Mentions of types outside `entity_types` are treated as plain tokens
    pub fn new(entity_types: Vec<EntityType>, relation_types: Vec<RelationType>) -> Self {
        Self {
            entity_types,
            relation_types,
        }
    }

    pub fn from_config(config: &PerceptronConfig) -> Result<Self> {
        Ok(Self::new(config.entity_types()?, config.relation_types()?))
    }

    /// The gold annotation of one sentence of `document`
    pub fn build(&self, document: &AnnotatedDocument, sentence: &Sentence) -> JointAnnotation {
        let mut segments: Vec<Segment> = Vec::with_capacity(sentence.len());
        let mut open_mention: Option<usize> = None;

        for token in &sentence.tokens {
            let mention = document
                .entity_covering(token.begin, token.end)
                .filter(|(_, e)| self.entity_types.contains(&e.entity_type));

            match mention {
                Some((index, entity)) => {
                    if open_mention == Some(index) {
                        if let Some(open) = segments.last_mut() {
                            open.extend(token);
                            continue;
                        }
                    }
                    let mut segment = Segment::from_token(token, entity.entity_type);
                    segment.mesh = entity
                        .mesh
                        .as_deref()
                        .filter(|m| *m != UNRESOLVED)
                        .map(str::to_string);
                    segments.push(segment);
                    open_mention = Some(index);
                }
                None => {
                    segments.push(Segment::from_token(token, EntityType::Empty));
                    open_mention = None;
                }
            }
        }

        let relations = relation_pairs(&segments)
            .into_iter()
            .filter_map(|(i, j)| {
                let first = segments[i].mesh.as_deref()?;
                let second = segments[j].mesh.as_deref()?;
                self.relation_types
                    .iter()
                    .find(|r| document.has_relation(**r, first, second))
                    .map(|r| RelationEntity::new(*r, i, j))
            })
            .collect();

        JointAnnotation {
            segments,
            relations,
        }
    }

    /// Sentence records with gold annotations for a whole document
    pub fn records(&self, document: &AnnotatedDocument, sentences: Vec<Sentence>) -> Vec<SentenceRecord> {
        sentences
            .into_iter()
            .map(|sentence| {
                let gold = self.build(document, &sentence);
                SentenceRecord::new(sentence, Some(gold))
            })
            .collect()
    }
}
