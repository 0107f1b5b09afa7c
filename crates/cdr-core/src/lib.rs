//! CDR Core - Domain models, errors and shared types
//!
//! This crate defines the core abstractions used throughout the joint
//! chemical/disease extraction system:
//! - Text units (tokens, sentences)
//! - Entity segments and chemical-induces-disease relations
//! - Annotated gold documents
//! - Common error types
//! - Configuration management
//! - Versioned persistence of preprocessed instances

pub mod config;
pub mod store;

pub use config::{
    AppConfig, ConfigError, DataConfig, LoggingConfig, PerceptronConfig, RelationCandidates,
};
pub use store::{read_versioned, write_versioned, InstanceStore, SentenceRecord, FORMAT_VERSION};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for CDR operations
#[derive(Error, Debug)]
pub enum CdrError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Feature alphabet is frozen, cannot intern {0:?}")]
    AlphabetFrozen(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported {kind} format version {found} (expected {expected})")]
    UnsupportedVersion {
        kind: String,
        found: u32,
        expected: u32,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CdrError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CdrError>;

// ============================================================================
// Entity and Relation Types
// ============================================================================

/// Segment type tags
///
/// `Empty` marks a single token that belongs to no entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EntityType {
    Disease,
    Chemical,
    #[serde(rename = "EMPTY")]
    Empty,
}

impl EntityType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disease => "Disease",
            Self::Chemical => "Chemical",
            Self::Empty => "EMPTY",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disease" => Ok(Self::Disease),
            "chemical" => Ok(Self::Chemical),
            "empty" => Ok(Self::Empty),
            _ => Err(ConfigError::UnknownEntityType(s.to_string())),
        }
    }
}

/// Relation types between normalized identifiers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum RelationType {
    /// Chemical-induces-disease
    #[serde(rename = "CID")]
    Cid,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cid => "CID",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CID" => Ok(Self::Cid),
            _ => Err(ConfigError::UnknownRelationType(s.to_string())),
        }
    }
}

// ============================================================================
// Text Units
// ============================================================================

/// A token with document-level character offsets (`[begin, end)`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Surface form
    pub word: String,

    /// Offset of the first character
    pub begin: usize,

    /// Offset one past the last character
    pub end: usize,

    /// Position within the sentence
    pub index: usize,
}

impl Token {
    /// Create a token whose end offset follows from the word length
    pub fn new(word: impl Into<String>, begin: usize, index: usize) -> Self {
        let word = word.into();
        let end = begin + word.chars().count();
        Self {
            word,
            begin,
            end,
            index,
        }
    }
}

/// A sentence ready for decoding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    /// Character offset of the sentence in its document
    pub offset: usize,

    /// Length in characters
    pub length: usize,

    /// Tokens in order
    pub tokens: Vec<Token>,
}

impl Sentence {
    pub fn new(offset: usize, length: usize, tokens: Vec<Token>) -> Self {
        Self {
            offset,
            length,
            tokens,
        }
    }

    /// Build a sentence from words separated by single spaces, starting at `offset`
    pub fn from_words(offset: usize, words: &[&str]) -> Self {
        let mut begin = offset;
        let mut tokens = Vec::with_capacity(words.len());
        for (index, word) in words.iter().enumerate() {
            let token = Token::new(*word, begin, index);
            begin = token.end + 1;
            tokens.push(token);
        }
        let length = tokens.last().map(|t| t.end - offset).unwrap_or(0);
        Self::new(offset, length, tokens)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

// ============================================================================
// Segments and Relations
// ============================================================================

/// A contiguous run of tokens `[start, end]` carrying one type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// First token index
    pub start: usize,

    /// Last token index (inclusive)
    pub end: usize,

    /// Type tag
    pub entity_type: EntityType,

    /// Character offset of the first token
    pub offset: usize,

    /// Surface text with the original inter-token whitespace
    pub text: String,

    /// Normalized identifier, if resolved
    pub mesh: Option<String>,
}

impl Segment {
    /// Open a one-token segment
    pub fn from_token(token: &Token, entity_type: EntityType) -> Self {
        Self {
            start: token.index,
            end: token.index,
            entity_type,
            offset: token.begin,
            text: token.word.clone(),
            mesh: None,
        }
    }

    pub fn with_mesh(mut self, mesh: impl Into<String>) -> Self {
        self.mesh = Some(mesh.into());
        self
    }

    /// Append the next token, restoring the whitespace gap before it
    pub fn extend(&mut self, token: &Token) {
        let gap = token.begin.saturating_sub(self.char_end());
        self.text.extend(std::iter::repeat(' ').take(gap));
        self.text.push_str(&token.word);
        self.end = token.index;
    }

    /// Offset one past the last character
    pub fn char_end(&self) -> usize {
        self.offset + self.text.chars().count()
    }

    pub fn token_count(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_entity(&self) -> bool {
        !self.entity_type.is_empty()
    }
}

/// A relation between normalized identifiers
///
/// Pairs are unordered: the lexicographically smaller identifier is always
/// stored first, so equality and hashing depend only on
/// `(type, id1, id2)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RelationRepr")]
pub struct Relation {
    relation_type: RelationType,
    id1: String,
    id2: String,
}

#[derive(Deserialize)]
struct RelationRepr {
    relation_type: RelationType,
    id1: String,
    id2: String,
}

impl From<RelationRepr> for Relation {
    fn from(repr: RelationRepr) -> Self {
        Relation::new(repr.relation_type, repr.id1, repr.id2)
    }
}

impl Relation {
    pub fn new(relation_type: RelationType, a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        let (id1, id2) = if a <= b { (a, b) } else { (b, a) };
        Self {
            relation_type,
            id1,
            id2,
        }
    }

    pub fn relation_type(&self) -> RelationType {
        self.relation_type
    }

    pub fn id1(&self) -> &str {
        &self.id1
    }

    pub fn id2(&self) -> &str {
        &self.id2
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}, {})", self.relation_type, self.id1, self.id2)
    }
}

/// A relation decision over two segments of the same annotation
///
/// `entity1` is the later segment and `entity2` the earlier one; both are
/// indices into the owning segment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationEntity {
    pub relation_type: RelationType,
    pub entity1: usize,
    pub entity2: usize,
}

impl RelationEntity {
    pub fn new(relation_type: RelationType, entity1: usize, entity2: usize) -> Self {
        Self {
            relation_type,
            entity1,
            entity2,
        }
    }

    /// Restate over normalized identifiers; `None` if either side is unresolved
    pub fn resolve(&self, segments: &[Segment]) -> Option<Relation> {
        let first = segments.get(self.entity1)?.mesh.as_ref()?;
        let second = segments.get(self.entity2)?.mesh.as_ref()?;
        Some(Relation::new(self.relation_type, first, second))
    }
}

/// Segmentation plus relation decisions for one sentence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointAnnotation {
    pub segments: Vec<Segment>,
    pub relations: Vec<RelationEntity>,
}

impl JointAnnotation {
    /// Non-EMPTY segments
    pub fn entities(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_entity())
    }

    /// Relations restated over identifiers, duplicates collapsed
    pub fn resolved_relations(&self) -> HashSet<Relation> {
        self.relations
            .iter()
            .filter_map(|r| r.resolve(&self.segments))
            .collect()
    }

    /// True when the segments partition `[0, token_count)` in order
    pub fn is_complete_partition(&self, token_count: usize) -> bool {
        let mut next = 0;
        for segment in &self.segments {
            if segment.start != next || segment.end < segment.start {
                return false;
            }
            if segment.entity_type.is_empty() && segment.start != segment.end {
                return false;
            }
            next = segment.end + 1;
        }
        next == token_count
    }
}

// ============================================================================
// Annotated Documents
// ============================================================================

/// A gold entity mention in document coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldEntity {
    /// Character offset of the mention
    pub offset: usize,

    /// Mention text
    pub text: String,

    /// Entity type
    pub entity_type: EntityType,

    /// Normalized identifier (`None` when the corpus gives none)
    #[serde(default)]
    pub mesh: Option<String>,
}

impl GoldEntity {
    pub fn new(offset: usize, text: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            offset,
            text: text.into(),
            entity_type,
            mesh: None,
        }
    }

    pub fn with_mesh(mut self, mesh: impl Into<String>) -> Self {
        self.mesh = Some(mesh.into());
        self
    }

    /// Offset one past the last character
    pub fn char_end(&self) -> usize {
        self.offset + self.text.chars().count()
    }

    /// True when `[begin, end)` lies inside the mention
    pub fn covers(&self, begin: usize, end: usize) -> bool {
        begin >= self.offset && end <= self.char_end()
    }
}

/// A document with gold entity and relation annotations
///
/// The title starts at offset zero; the abstract follows the title and one
/// space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedDocument {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub entities: Vec<GoldEntity>,
    #[serde(default)]
    pub relations: HashSet<Relation>,
}

impl AnnotatedDocument {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        abstract_text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            entities: Vec::new(),
            relations: HashSet::new(),
        }
    }

    pub fn with_entity(mut self, entity: GoldEntity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.insert(relation);
        self
    }

    /// Full text: title, one space, abstract
    pub fn content(&self) -> String {
        format!("{} {}", self.title, self.abstract_text)
    }

    /// The first gold entity covering `[begin, end)`, with its index
    pub fn entity_covering(&self, begin: usize, end: usize) -> Option<(usize, &GoldEntity)> {
        self.entities
            .iter()
            .enumerate()
            .find(|(_, e)| e.covers(begin, end))
    }

    /// Whether the gold relation set links the two identifiers
    pub fn has_relation(&self, relation_type: RelationType, a: &str, b: &str) -> bool {
        self.relations.contains(&Relation::new(relation_type, a, b))
    }

    /// Load a JSON array of documents
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CdrError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_is_unordered() {
        let a = Relation::new(RelationType::Cid, "D001", "C002");
        let b = Relation::new(RelationType::Cid, "C002", "D001");
        assert_eq!(a, b);
        assert_eq!(a.id1(), "C002");

        let set: HashSet<Relation> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_relation_deserialize_canonicalizes() {
        let json = r#"{"relation_type":"CID","id1":"D1","id2":"C1"}"#;
        let relation: Relation = serde_json::from_str(json).unwrap();
        assert_eq!(relation, Relation::new(RelationType::Cid, "C1", "D1"));
    }

    #[test]
    fn test_segment_extend_restores_whitespace() {
        let first = Token::new("acute", 10, 3);
        let second = Token::new("hepatitis", 18, 4);

        let mut segment = Segment::from_token(&first, EntityType::Disease);
        segment.extend(&second);

        assert_eq!(segment.text, "acute   hepatitis");
        assert_eq!((segment.start, segment.end), (3, 4));
        assert_eq!(segment.char_end(), 27);
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("disease".parse::<EntityType>().unwrap(), EntityType::Disease);
        assert_eq!(EntityType::Empty.to_string(), "EMPTY");
        assert!("gene".parse::<EntityType>().is_err());
        assert!("cid".parse::<RelationType>().is_ok());
    }

    #[test]
    fn test_resolve_requires_both_identifiers() {
        let sentence = Sentence::from_words(0, &["aspirin", "headache"]);
        let segments = vec![
            Segment::from_token(&sentence.tokens[0], EntityType::Chemical).with_mesh("C1"),
            Segment::from_token(&sentence.tokens[1], EntityType::Disease),
        ];

        let relation = RelationEntity::new(RelationType::Cid, 1, 0);
        assert!(relation.resolve(&segments).is_none());

        let mut segments = segments;
        segments[1].mesh = Some("D1".to_string());
        assert_eq!(
            relation.resolve(&segments),
            Some(Relation::new(RelationType::Cid, "C1", "D1"))
        );
    }

    #[test]
    fn test_partition_check() {
        let sentence = Sentence::from_words(0, &["a", "b", "c"]);
        let mut segment = Segment::from_token(&sentence.tokens[0], EntityType::Chemical);
        segment.extend(&sentence.tokens[1]);
        let annotation = JointAnnotation {
            segments: vec![
                segment,
                Segment::from_token(&sentence.tokens[2], EntityType::Empty),
            ],
            relations: vec![],
        };

        assert!(annotation.is_complete_partition(3));
        assert!(!annotation.is_complete_partition(4));
        assert!(JointAnnotation::default().is_complete_partition(0));
    }

    #[test]
    fn test_document_entity_covering() {
        let doc = AnnotatedDocument::new("1", "Aspirin causes headache.", "")
            .with_entity(GoldEntity::new(0, "Aspirin", EntityType::Chemical).with_mesh("C1"))
            .with_entity(GoldEntity::new(15, "headache", EntityType::Disease).with_mesh("D1"))
            .with_relation(Relation::new(RelationType::Cid, "D1", "C1"));

        assert_eq!(doc.content(), "Aspirin causes headache. ");
        assert_eq!(doc.entity_covering(0, 7).map(|(i, _)| i), Some(0));
        assert!(doc.entity_covering(8, 14).is_none());
        assert_eq!(doc.entity_covering(15, 23).map(|(i, _)| i), Some(1));
        assert!(doc.has_relation(RelationType::Cid, "C1", "D1"));
    }
}
