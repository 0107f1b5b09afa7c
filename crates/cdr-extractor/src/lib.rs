//! CDR Extractor - Joint entity and relation extraction
//!
//! Segments sentences into Disease/Chemical mentions and decides CID
//! relations between them in one beam search, scored by a structured
//! perceptron trained with early update.
//!
//! Decoding pipeline: [`tokenize`] → [`decoder`] (reads [`model`],
//! [`alphabet`] and [`features`]) → [`metrics`]. Training runs the same
//! decoder from [`trainer`] against gold output built by [`gold`].

use cdr_core::{JointAnnotation, Result, Sentence};

/// Trait for joint extractors
pub trait JointExtractor: Send + Sync {
    fn extract(&self, sentence: &Sentence) -> Result<JointAnnotation>;
}

pub mod alphabet;
pub mod decoder;
pub mod features;
pub mod gold;
pub mod hypothesis;
pub mod mesh;
pub mod metrics;
pub mod model;
pub mod model_file;
pub mod tokenize;
pub mod trainer;

pub use alphabet::{FeatureAlphabet, FeatureId};
pub use decoder::{BeamDecoder, DecodeOutcome};
pub use features::{
    Candidate, EntityFeatures, Extractor, FeatureFunction, FeatureSet, RelationFeatures, Stage,
};
pub use gold::GoldBuilder;
pub use hypothesis::{gold_actions, relation_pairs, Action, Hypothesis};
pub use mesh::{MeshDictionary, MeshResolver, NullResolver};
pub use metrics::{AggregateMetrics, DocumentMetrics, Evaluator, ExtractionMetrics};
pub use model::{LabelSet, Perceptron, WeightAverager};
pub use model_file::ModelFile;
pub use tokenize::{SentenceSplitter, TextPreparer, Tokenizer};
pub use trainer::{EpochReport, StepOutcome, TrainedModel, Trainer, TrainingInstance};
