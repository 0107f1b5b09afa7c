//! Trained model persistence

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cdr_core::{read_versioned, write_versioned, CdrError, PerceptronConfig, Result};

use crate::alphabet::FeatureAlphabet;
use crate::decoder::BeamDecoder;
use crate::features::FeatureSet;
use crate::mesh::MeshResolver;
use crate::model::Perceptron;
use crate::trainer::TrainedModel;

const KIND: &str = "model";

/// Everything a decoder needs, as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub config: PerceptronConfig,
    pub alphabet: FeatureAlphabet,
    pub model: Perceptron,
    pub features: FeatureSet,
    pub trained_at: DateTime<Utc>,
    pub epochs_run: usize,
}

impl ModelFile {
    pub fn new(config: PerceptronConfig, trained: TrainedModel) -> Self {
        Self {
            config,
            alphabet: trained.alphabet,
            model: trained.model,
            features: trained.features,
            trained_at: Utc::now(),
            epochs_run: trained.reports.len(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CdrError::io(parent, e))?;
        }
        write_versioned(path, KIND, self)?;
        tracing::info!(
            "Saved model ({} features, {} labels) to {}",
            self.alphabet.len(),
            self.model.labels().len(),
            path.display()
        );
        Ok(())
    }

    /// Load and check that the weight table fits the alphabet
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file: Self = read_versioned(path, KIND)?;
        if file.model.num_features() != file.alphabet.len() || !file.alphabet.is_frozen() {
            return Err(CdrError::InvalidInput(format!(
                "model has {} feature rows but alphabet holds {} (frozen: {})",
                file.model.num_features(),
                file.alphabet.len(),
                file.alphabet.is_frozen()
            )));
        }
        Ok(file)
    }

    /// Decoder over the stored weights with the stored beam settings
    pub fn decoder<'a>(&'a self, resolver: &'a dyn MeshResolver) -> Result<BeamDecoder<'a>> {
        Ok(BeamDecoder::new(
            &self.model,
            &self.alphabet,
            &self.features,
            resolver,
            self.config.beam_size,
        )?
        .with_relation_candidates(self.config.relation_candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LabelSet;
    use cdr_core::{EntityType, RelationType, Sentence};

    fn model_file() -> ModelFile {
        let mut alphabet = FeatureAlphabet::new();
        let id = alphabet.intern("w=aspirin").unwrap();
        alphabet.freeze();
        let mut model = Perceptron::new(
            LabelSet::new(&[EntityType::Chemical], &[RelationType::Cid]),
            alphabet.len(),
        );
        model
            .update(&[id], crate::hypothesis::Action::Begin(EntityType::Chemical), 1.5)
            .unwrap();

        ModelFile {
            config: PerceptronConfig::default(),
            alphabet,
            model,
            features: FeatureSet::default(),
            trained_at: Utc::now(),
            epochs_run: 3,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let original = model_file();
        original.save(&path).unwrap();

        let loaded = ModelFile::load(&path).unwrap();
        assert_eq!(loaded.model, original.model);
        assert_eq!(loaded.features, original.features);
        assert_eq!(loaded.alphabet.lookup("w=aspirin"), Some(0));
        assert_eq!(loaded.epochs_run, 3);

        let sentence = Sentence::from_words(0, &["Aspirin", "works"]);
        let decoded = loaded.decoder(&crate::mesh::NullResolver).unwrap().decode(&sentence).unwrap();
        assert_eq!(decoded.segments[0].entity_type, EntityType::Chemical);
    }

    #[test]
    fn test_rejects_mismatched_alphabet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut broken = model_file();
        broken.alphabet = FeatureAlphabet::new();
        broken.save(&path).unwrap();

        assert!(ModelFile::load(&path).is_err());
    }
}
