//! Feature alphabet
//!
//! Bidirectional mapping between feature descriptors and dense ids. The
//! alphabet is filled once from the gold actions of the training data and
//! frozen afterwards; frozen lookups never allocate, so features unseen at
//! training time simply drop out of scoring.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use cdr_core::{CdrError, Result};

/// Dense feature identifier
pub type FeatureId = u32;

/// Descriptor ↔ id table
///
/// Serialized as the ordered descriptor list plus the frozen flag; the
/// reverse index is rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "AlphabetRepr", into = "AlphabetRepr")]
pub struct FeatureAlphabet {
    index: HashMap<String, FeatureId>,
    features: Vec<String>,
    frozen: bool,
}

#[derive(Serialize, Deserialize)]
struct AlphabetRepr {
    features: Vec<String>,
    frozen: bool,
}

impl From<AlphabetRepr> for FeatureAlphabet {
    fn from(repr: AlphabetRepr) -> Self {
        let index = repr
            .features
            .iter()
            .enumerate()
            .map(|(id, f)| (f.clone(), id as FeatureId))
            .collect();
        Self {
            index,
            features: repr.features,
            frozen: repr.frozen,
        }
    }
}

impl From<FeatureAlphabet> for AlphabetRepr {
    fn from(alphabet: FeatureAlphabet) -> Self {
        Self {
            features: alphabet.features,
            frozen: alphabet.frozen,
        }
    }
}

impl FeatureAlphabet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `descriptor`, allocating one while the alphabet is open
    pub fn intern(&mut self, descriptor: &str) -> Result<FeatureId> {
        if let Some(&id) = self.index.get(descriptor) {
            return Ok(id);
        }
        if self.frozen {
            return Err(CdrError::AlphabetFrozen(descriptor.to_string()));
        }
        if self.features.len() > FeatureId::MAX as usize {
            return Err(CdrError::InvalidInput(
                "feature alphabet exceeded FeatureId capacity (u32)".to_string(),
            ));
        }

        let id = self.features.len() as FeatureId;
        self.index.insert(descriptor.to_string(), id);
        self.features.push(descriptor.to_string());
        Ok(id)
    }

    /// Id for `descriptor` if known; never allocates
    pub fn lookup(&self, descriptor: &str) -> Option<FeatureId> {
        self.index.get(descriptor).copied()
    }

    /// Known ids for a descriptor list, sorted and deduplicated
    pub fn lookup_all<S: AsRef<str>>(&self, descriptors: &[S]) -> Vec<FeatureId> {
        let mut ids: Vec<FeatureId> = descriptors
            .iter()
            .filter_map(|d| self.lookup(d.as_ref()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Intern every descriptor, returning sorted deduplicated ids
    pub fn intern_all<S: AsRef<str>>(&mut self, descriptors: &[S]) -> Result<Vec<FeatureId>> {
        let mut ids = descriptors
            .iter()
            .map(|d| self.intern(d.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    pub fn descriptor(&self, id: FeatureId) -> Option<&str> {
        self.features.get(id as usize).map(String::as_str)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
