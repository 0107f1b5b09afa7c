//! Versioned persistence
//!
//! Every artifact is written as a JSON envelope carrying a format version,
//! a kind tag and a timestamp. Preprocessed sentences live in an
//! [`InstanceStore`]: one directory per document, `<k>.input.json` for the
//! sentence and `<k>.output.json` for its gold annotation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{CdrError, JointAnnotation, Result, Sentence};

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

const SENTENCE_KIND: &str = "sentence";
const GOLD_KIND: &str = "gold";

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format_version: u32,
    kind: &'a str,
    written_at: DateTime<Utc>,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    format_version: u32,
    kind: String,
    #[allow(dead_code)]
    written_at: DateTime<Utc>,
    payload: serde_json::Value,
}

/// Write `payload` wrapped in a versioned envelope
pub fn write_versioned<T: Serialize>(path: impl AsRef<Path>, kind: &str, payload: &T) -> Result<()> {
    let path = path.as_ref();
    let envelope = EnvelopeRef {
        format_version: FORMAT_VERSION,
        kind,
        written_at: Utc::now(),
        payload,
    };
    let json = serde_json::to_string_pretty(&envelope)?;
    std::fs::write(path, json).map_err(|e| CdrError::io(path, e))
}

/// Read a payload written by [`write_versioned`], checking kind and version
pub fn read_versioned<T: DeserializeOwned>(path: impl AsRef<Path>, kind: &str) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| CdrError::io(path, e))?;
    let envelope: Envelope = serde_json::from_str(&content)?;

    if envelope.kind != kind {
        return Err(CdrError::InvalidInput(format!(
            "expected a {kind} record in {}, found {}",
            path.display(),
            envelope.kind
        )));
    }
    if envelope.format_version != FORMAT_VERSION {
        return Err(CdrError::UnsupportedVersion {
            kind: kind.to_string(),
            found: envelope.format_version,
            expected: FORMAT_VERSION,
        });
    }

    Ok(serde_json::from_value(envelope.payload)?)
}

/// A preprocessed sentence with its gold annotation, if known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceRecord {
    pub sentence: Sentence,
    pub gold: Option<JointAnnotation>,
}

impl SentenceRecord {
    pub fn new(sentence: Sentence, gold: Option<JointAnnotation>) -> Self {
        Self { sentence, gold }
    }
}

/// Directory of preprocessed sentence records, grouped by document
#[derive(Debug, Clone)]
pub struct InstanceStore {
    root: PathBuf,
}

impl InstanceStore {
    /// Create the store directory, clearing any previous contents
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.exists() {
            for entry in std::fs::read_dir(&root).map_err(|e| CdrError::io(&root, e))? {
                let path = entry.map_err(|e| CdrError::io(&root, e))?.path();
                let removed = if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                removed.map_err(|e| CdrError::io(&path, e))?;
            }
        } else {
            std::fs::create_dir_all(&root).map_err(|e| CdrError::io(&root, e))?;
        }
        Ok(Self { root })
    }

    /// Open an existing store
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(CdrError::InvalidInput(format!(
                "instance directory {} does not exist",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_dir(&self, document_id: &str) -> Result<PathBuf> {
        if document_id.is_empty()
            || document_id.contains(['/', '\\'])
            || document_id == "."
            || document_id == ".."
        {
            return Err(CdrError::InvalidInput(format!(
                "document id {document_id:?} is not usable as a directory name"
            )));
        }
        Ok(self.root.join(document_id))
    }

    /// Write all sentence records of one document
    pub fn write_document(&self, document_id: &str, records: &[SentenceRecord]) -> Result<()> {
        let dir = self.document_dir(document_id)?;
        std::fs::create_dir_all(&dir).map_err(|e| CdrError::io(&dir, e))?;

        for (k, record) in records.iter().enumerate() {
            write_versioned(dir.join(format!("{k}.input.json")), SENTENCE_KIND, &record.sentence)?;
            if let Some(gold) = &record.gold {
                write_versioned(dir.join(format!("{k}.output.json")), GOLD_KIND, gold)?;
            }
        }

        tracing::info!(
            "Stored {} sentence records for document {}",
            records.len(),
            document_id
        );
        Ok(())
    }

    /// Read the sentence records of one document in sentence order
    pub fn read_document(&self, document_id: &str) -> Result<Vec<SentenceRecord>> {
        let dir = self.document_dir(document_id)?;
        let mut inputs: BTreeMap<usize, PathBuf> = BTreeMap::new();

        for entry in std::fs::read_dir(&dir).map_err(|e| CdrError::io(&dir, e))? {
            let path = entry.map_err(|e| CdrError::io(&dir, e))?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if let Some(k) = name.strip_suffix(".input.json") {
                match k.parse::<usize>() {
                    Ok(k) => {
                        inputs.insert(k, path);
                    }
                    Err(_) => tracing::warn!("Skipping unexpected file {}", path.display()),
                }
            }
        }

        inputs
            .into_iter()
            .map(|(k, input)| {
                let sentence: Sentence = read_versioned(&input, SENTENCE_KIND)?;
                let output = dir.join(format!("{k}.output.json"));
                let gold = if output.exists() {
                    Some(read_versioned(&output, GOLD_KIND)?)
                } else {
                    None
                };
                Ok(SentenceRecord::new(sentence, gold))
            })
            .collect()
    }

    /// Document ids present in the store, sorted
    pub fn document_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(|e| CdrError::io(&self.root, e))? {
            let path = entry.map_err(|e| CdrError::io(&self.root, e))?.path();
            if path.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
