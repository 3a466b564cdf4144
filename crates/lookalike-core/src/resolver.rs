//! Descriptive metadata for gallery identities.

use crate::normalize_identity_key;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("no metadata record for {0}")]
    NotFound(String),
    #[error("metadata backend: {0}")]
    Backend(String),
}

/// One cataloged character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    /// Reference folder path, e.g. "Movie/Character (Actor)".
    pub identity_key: String,
    pub movie: String,
    pub character: String,
    pub actor: String,
    /// Representative image file name inside the folder.
    pub image_file: String,
    /// RFC 3339 timestamp of ingestion.
    pub added_at: String,
}

impl CharacterRecord {
    /// "Character (Actor)".
    pub fn character_actor(&self) -> String {
        format!("{} ({})", self.character, self.actor)
    }
}

/// Read-only identity-key → record lookup.
pub trait MetadataResolver: Send + Sync {
    fn lookup(&self, identity_key: &str) -> Result<CharacterRecord, ResolveError>;

    fn list_all(&self) -> Result<Vec<CharacterRecord>, ResolveError>;
}

/// Records held in memory, typically bootstrapped once from a store's `list_all`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryResolver {
    by_key: HashMap<String, CharacterRecord>,
    order: Vec<String>,
}

impl InMemoryResolver {
    /// Later records with an already seen key are ignored. Keys are compared
    /// in normalized form (see [`normalize_identity_key`]).
    pub fn from_records(records: impl IntoIterator<Item = CharacterRecord>) -> Self {
        let mut resolver = Self::default();
        for record in records {
            let key = normalize_identity_key(&record.identity_key);
            if resolver.by_key.contains_key(&key) {
                tracing::warn!(key = %record.identity_key, "duplicate metadata record ignored");
                continue;
            }
            resolver.order.push(key.clone());
            resolver.by_key.insert(key, record);
        }
        resolver
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl MetadataResolver for InMemoryResolver {
    fn lookup(&self, identity_key: &str) -> Result<CharacterRecord, ResolveError> {
        self.by_key
            .get(&normalize_identity_key(identity_key))
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(identity_key.to_string()))
    }

    fn list_all(&self) -> Result<Vec<CharacterRecord>, ResolveError> {
        Ok(self.order.iter().filter_map(|k| self.by_key.get(k).cloned()).collect())
    }
}
