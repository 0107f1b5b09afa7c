//! CDR Configuration Management
//!
//! Handles configuration from environment variables and TOML files with
//! sensible defaults for the CDR corpus. Structural violations are rejected
//! by [`AppConfig::validate`] before any decoding begins.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::{EntityType, RelationType};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Perceptron and decoder settings
    pub perceptron: PerceptronConfig,

    /// Input/output locations
    pub data: DataConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (a set variable always wins)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        // Perceptron
        if let Some(value) = env_var("CDR_BEAM_SIZE") {
            self.perceptron.beam_size = parse_env("CDR_BEAM_SIZE", value)?;
        }
        if let Some(value) = env_var("CDR_EPOCHS") {
            self.perceptron.epochs = parse_env("CDR_EPOCHS", value)?;
        }
        if let Some(value) = env_var("CDR_ENTITY_TYPES") {
            self.perceptron.entity_types = split_list(&value);
        }
        if let Some(value) = env_var("CDR_RELATION_TYPES") {
            self.perceptron.relation_types = split_list(&value);
        }
        if let Some(value) = env_var("CDR_EARLY_UPDATE") {
            self.perceptron.early_update = parse_env("CDR_EARLY_UPDATE", value)?;
        }
        if let Some(value) = env_var("CDR_AVERAGED") {
            self.perceptron.averaged = parse_env("CDR_AVERAGED", value)?;
        }
        if let Some(value) = env_var("CDR_RELATION_CANDIDATES") {
            self.perceptron.relation_candidates = value.parse()?;
        }
        if let Some(value) = env_var("CDR_STOP_ON_CONVERGENCE") {
            self.perceptron.stop_on_convergence = parse_env("CDR_STOP_ON_CONVERGENCE", value)?;
        }

        // Data; an empty value clears the optional paths
        if let Some(path) = env_var("CDR_DOCUMENTS") {
            self.data.documents = PathBuf::from(path);
        }
        if let Some(path) = env_var("CDR_INSTANCE_DIR") {
            self.data.instance_dir = PathBuf::from(path);
        }
        if let Some(path) = env_var("CDR_MODEL_PATH") {
            self.data.model_path = PathBuf::from(path);
        }
        if let Some(path) = env_var("CDR_DICTIONARY") {
            self.data.dictionary = optional_path(path);
        }
        if let Some(value) = env_var("CDR_SENTENCE_DELIMITERS") {
            self.data.sentence_delimiters = value;
        }
        if let Some(path) = env_var("CDR_ABBREVIATIONS") {
            self.data.abbreviations = optional_path(path);
        }

        // Logging
        if let Some(level) = env_var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(value) = env_var("LOG_JSON") {
            self.logging.json_format = parse_env("LOG_JSON", value)?;
        }

        Ok(self)
    }

    /// Reject configurations that cannot drive a decoder
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.perceptron.validate()
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn optional_path(value: String) -> Option<PathBuf> {
    (!value.trim().is_empty()).then(|| PathBuf::from(value))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Which phase-1 survivors enter relation linking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationCandidates {
    /// The whole surviving beam
    #[default]
    Beam,
    /// Only the best segmentation
    Best,
}

impl std::str::FromStr for RelationCandidates {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beam" => Ok(Self::Beam),
            "best" => Ok(Self::Best),
            _ => Err(ConfigError::InvalidValue {
                key: "relation_candidates".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Perceptron training and decoding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptronConfig {
    /// Beam width for both decoder phases (1 = greedy)
    pub beam_size: usize,

    /// Number of passes over the training sentences
    pub epochs: usize,

    /// Entity types the segmenter may assign (EMPTY is implicit)
    pub entity_types: Vec<String>,

    /// Relation types the linker may assign
    pub relation_types: Vec<String>,

    /// Stop decoding as soon as the gold prefix leaves the beam
    pub early_update: bool,

    /// Average weights over all training steps
    pub averaged: bool,

    /// Phase-1 survivors passed to relation linking
    pub relation_candidates: RelationCandidates,

    /// Stop before the epoch budget once an epoch makes no update
    pub stop_on_convergence: bool,
}

impl Default for PerceptronConfig {
    fn default() -> Self {
        Self {
            beam_size: 1,
            epochs: 10,
            entity_types: vec!["Disease".to_string(), "Chemical".to_string()],
            relation_types: vec!["CID".to_string()],
            early_update: true,
            averaged: true,
            relation_candidates: RelationCandidates::Beam,
            stop_on_convergence: true,
        }
    }
}

impl PerceptronConfig {
    /// Parsed entity types in configured order
    pub fn entity_types(&self) -> Result<Vec<EntityType>, ConfigError> {
        let mut seen = HashSet::new();
        self.entity_types
            .iter()
            .map(|name| {
                let entity_type: EntityType = name.parse()?;
                if entity_type.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "entity_types".to_string(),
                        value: name.clone(),
                    });
                }
                if !seen.insert(entity_type) {
                    return Err(ConfigError::DuplicateType(name.clone()));
                }
                Ok(entity_type)
            })
            .collect()
    }

    /// Parsed relation types in configured order
    pub fn relation_types(&self) -> Result<Vec<RelationType>, ConfigError> {
        let mut seen = HashSet::new();
        self.relation_types
            .iter()
            .map(|name| {
                let relation_type: RelationType = name.parse()?;
                if !seen.insert(relation_type) {
                    return Err(ConfigError::DuplicateType(name.clone()));
                }
                Ok(relation_type)
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.beam_size < 1 {
            return Err(ConfigError::InvalidBeamSize(self.beam_size));
        }
        self.entity_types()?;
        self.relation_types()?;
        Ok(())
    }
}

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Annotated documents (JSON array)
    pub documents: PathBuf,

    /// Directory of preprocessed sentence records
    pub instance_dir: PathBuf,

    /// Trained model file
    pub model_path: PathBuf,

    /// Optional surface→identifier TSV; gold annotations are used otherwise
    pub dictionary: Option<PathBuf>,

    /// Characters that end a sentence besides `.`, `!` and `?`
    pub sentence_delimiters: String,

    /// Abbreviations that never end a sentence (one per line)
    pub abbreviations: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            documents: PathBuf::from("data/documents.json"),
            instance_dir: PathBuf::from("data/instances"),
            model_path: PathBuf::from("data/model.json"),
            dictionary: None,
            sentence_delimiters: ";".to_string(),
            abbreviations: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Beam size must be at least 1, got {0}")]
    InvalidBeamSize(usize),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Unknown relation type: {0}")]
    UnknownRelationType(String),

    #[error("Type listed more than once: {0}")]
    DuplicateType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.perceptron.beam_size, 1);
        assert_eq!(config.perceptron.epochs, 10);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.perceptron.entity_types().unwrap(),
            vec![EntityType::Disease, EntityType::Chemical]
        );
    }

    #[test]
    fn test_rejects_zero_beam() {
        let config = PerceptronConfig {
            beam_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBeamSize(0))
        ));
    }

    #[test]
    fn test_rejects_unknown_and_empty_types() {
        let unknown = PerceptronConfig {
            entity_types: vec!["Gene".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            unknown.validate(),
            Err(ConfigError::UnknownEntityType(_))
        ));

        let empty = PerceptronConfig {
            entity_types: vec!["EMPTY".to_string()],
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let relation = PerceptronConfig {
            relation_types: vec!["CID".to_string(), "cid".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            relation.validate(),
            Err(ConfigError::DuplicateType(_))
        ));
    }

    #[test]
    fn test_toml_partial_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [perceptron]
            beam_size = 4
            relation_candidates = "best"

            [logging]
            json_format = true
            "#,
        )
        .unwrap();

        assert_eq!(config.perceptron.beam_size, 4);
        assert_eq!(config.perceptron.epochs, 10);
        assert_eq!(
            config.perceptron.relation_candidates,
            RelationCandidates::Best
        );
        assert!(config.logging.json_format);
        assert_eq!(config.logging.level, "info");
    }

    const ENV_KEYS: &[&str] = &[
        "CDR_BEAM_SIZE",
        "CDR_EPOCHS",
        "CDR_ENTITY_TYPES",
        "CDR_RELATION_TYPES",
        "CDR_EARLY_UPDATE",
        "CDR_AVERAGED",
        "CDR_RELATION_CANDIDATES",
        "CDR_STOP_ON_CONVERGENCE",
        "CDR_DOCUMENTS",
        "CDR_INSTANCE_DIR",
        "CDR_MODEL_PATH",
        "CDR_DICTIONARY",
        "CDR_SENTENCE_DELIMITERS",
        "CDR_ABBREVIATIONS",
        "LOG_LEVEL",
        "LOG_JSON",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    // The only test touching process environment; the variables are global.
    #[test]
    fn test_env_overrides_file_values() {
        clear_env();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdr.toml");
        std::fs::write(
            &path,
            r#"
            [perceptron]
            beam_size = 4
            early_update = true
            stop_on_convergence = true

            [data]
            dictionary = "mesh.tsv"
            "#,
        )
        .unwrap();

        let untouched = AppConfig::from_file(&path).unwrap().with_env_override().unwrap();
        assert_eq!(untouched.perceptron.beam_size, 4);
        assert!(untouched.perceptron.early_update);

        std::env::set_var("CDR_BEAM_SIZE", "8");
        std::env::set_var("CDR_EARLY_UPDATE", "false");
        std::env::set_var("CDR_STOP_ON_CONVERGENCE", "false");
        std::env::set_var("CDR_DICTIONARY", "");
        std::env::set_var("CDR_SENTENCE_DELIMITERS", ";:");
        std::env::set_var("CDR_ABBREVIATIONS", "abbrev.txt");
        std::env::set_var("LOG_JSON", "true");

        let config = AppConfig::from_file(&path).unwrap().with_env_override().unwrap();
        assert_eq!(config.perceptron.beam_size, 8);
        assert!(!config.perceptron.early_update);
        assert!(!config.perceptron.stop_on_convergence);
        assert_eq!(config.data.dictionary, None);
        assert_eq!(config.data.sentence_delimiters, ";:");
        assert_eq!(config.data.abbreviations, Some(PathBuf::from("abbrev.txt")));
        assert!(config.logging.json_format);

        // an env value equal to the default still beats the file
        std::env::set_var("CDR_BEAM_SIZE", "1");
        let config = AppConfig::from_file(&path).unwrap().with_env_override().unwrap();
        assert_eq!(config.perceptron.beam_size, 1);

        let from_env = AppConfig::from_env().unwrap();
        assert!(!from_env.perceptron.early_update);
        assert_eq!(from_env.data.dictionary, None);

        std::env::set_var("CDR_BEAM_SIZE", "wide");
        let result = AppConfig::from_file(&path).unwrap().with_env_override();
        clear_env();

        match result {
            Err(ConfigError::InvalidValue { key, value }) => {
                assert_eq!(key, "CDR_BEAM_SIZE");
                assert_eq!(value, "wide");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_relation_candidates_parse() {
        assert_eq!(
            "BEAM".parse::<RelationCandidates>().unwrap(),
            RelationCandidates::Beam
        );
        assert!("all".parse::<RelationCandidates>().is_err());
    }
}
