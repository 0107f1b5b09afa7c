//! Identifier normalization
//!
//! Maps entity surface text to a normalized (MeSH) identifier. Failing to
//! resolve is a normal outcome: such entities are dropped from evaluation
//! and from every relation that mentions them.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cdr_core::{AnnotatedDocument, CdrError, Result};

/// Identifier used by the corpus for "no identifier"
const UNRESOLVED: &str = "-1";

/// Surface text → normalized identifier lookup
pub trait MeshResolver: Send + Sync {
    fn resolve(&self, surface: &str) -> Option<String>;
}

/// Resolver that never resolves anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver;

impl MeshResolver for NullResolver {
    fn resolve(&self, _surface: &str) -> Option<String> {
        None
    }
}

/// Dictionary keyed by lower-cased, whitespace-normalized surface text
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshDictionary {
    entries: HashMap<String, String>,
}

fn normalize(surface: &str) -> String {
    surface
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl MeshDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; the corpus "no identifier" marker is ignored
    pub fn insert(&mut self, surface: &str, mesh: &str) {
        let mesh = mesh.trim();
        if mesh.is_empty() || mesh == UNRESOLVED {
            return;
        }
        self.entries
            .entry(normalize(surface))
            .or_insert_with(|| mesh.to_string());
    }

    /// Build from the gold mentions of annotated documents
    ///
    /// The first identifier seen for a surface form wins.
    pub fn from_documents(documents: &[AnnotatedDocument]) -> Self {
        let mut dictionary = Self::new();
        for entity in documents.iter().flat_map(|d| d.entities.iter()) {
            if let Some(mesh) = &entity.mesh {
                dictionary.insert(&entity.text, mesh);
            }
        }
        tracing::debug!("Built identifier dictionary with {} entries", dictionary.len());
        dictionary
    }

    /// Load `surface<TAB>identifier` lines; blank lines and `#` comments are skipped
    pub fn from_tsv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CdrError::io(path, e))?;

        let mut dictionary = Self::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim_end();
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('\t') {
                Some((surface, mesh)) => dictionary.insert(surface, mesh),
                None => {
                    return Err(CdrError::InvalidInput(format!(
                        "{}:{}: expected surface<TAB>identifier",
                        path.display(),
                        line_no + 1
                    )))
                }
            }
        }
        Ok(dictionary)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MeshResolver for MeshDictionary {
    fn resolve(&self, surface: &str) -> Option<String> {
        self.entries.get(&normalize(surface)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdr_core::{EntityType, GoldEntity};

    #[test]
    fn test_resolve_is_case_and_space_insensitive() {
        let mut dictionary = MeshDictionary::new();
        dictionary.insert("Acute  Renal Failure", "D058186");

        assert_eq!(
            dictionary.resolve("acute renal failure").as_deref(),
            Some("D058186")
        );
        assert_eq!(dictionary.resolve("renal failure"), None);
    }

    #[test]
    fn test_unresolved_marker_is_ignored() {
        let mut dictionary = MeshDictionary::new();
        dictionary.insert("pain", "-1");
        assert!(dictionary.is_empty());
    }

    #[test]
    fn test_from_documents_first_identifier_wins() {
        let docs = vec![
            AnnotatedDocument::new("1", "t", "a")
                .with_entity(GoldEntity::new(0, "Lithium", EntityType::Chemical).with_mesh("D008094"))
                .with_entity(GoldEntity::new(10, "lithium", EntityType::Chemical).with_mesh("D999"))
                .with_entity(GoldEntity::new(20, "fever", EntityType::Disease)),
        ];
        let dictionary = MeshDictionary::from_documents(&docs);

        assert_eq!(dictionary.len(), 1);
        assert_eq!(dictionary.resolve("LITHIUM").as_deref(), Some("D008094"));
    }

    #[test]
    fn test_from_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.tsv");
        std::fs::write(&path, "# surface\tid\nnaloxone\tD009270\n\nclonidine\tD003000\n").unwrap();

        let dictionary = MeshDictionary::from_tsv(&path).unwrap();
        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary.resolve("Naloxone").as_deref(), Some("D009270"));

        std::fs::write(&path, "broken line\n").unwrap();
        assert!(MeshDictionary::from_tsv(&path).is_err());
    }

    #[test]
    fn test_null_resolver() {
        assert_eq!(NullResolver.resolve("anything"), None);
    }
}
