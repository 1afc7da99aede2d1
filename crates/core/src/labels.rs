//! Dense integer labels for identity keys, assigned in first-seen order.

use crate::models::IdentityKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bijection between identity keys (`"{class}-{roll}"`) and labels `0..len`.
///
/// Rebuilt from scratch on every training run; never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct IdentityLabelMap {
    keys: Vec<String>,
    index: HashMap<String, u32>,
}

impl IdentityLabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the label of `key`, assigning the next free one on first sight.
    pub fn label_for_or_insert(&mut self, key: &IdentityKey) -> u32 {
        let key = key.to_string();
        if let Some(label) = self.index.get(&key) {
            return *label;
        }
        let label = self.keys.len() as u32;
        self.index.insert(key.clone(), label);
        self.keys.push(key);
        label
    }

    pub fn label_of(&self, key: &IdentityKey) -> Option<u32> {
        self.index.get(&key.to_string()).copied()
    }

    /// Inverse lookup. The returned key still has to be decoded with
    /// [`IdentityKey::parse`].
    pub fn key_of(&self, label: u32) -> Option<&str> {
        self.keys.get(label as usize).map(String::as_str)
    }

    pub fn contains_label(&self, label: u32) -> bool {
        (label as usize) < self.keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// (label, key) pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.keys
            .iter()
            .enumerate()
            .map(|(label, key)| (label as u32, key.as_str()))
    }
}

impl From<Vec<String>> for IdentityLabelMap {
    fn from(keys: Vec<String>) -> Self {
        let mut map = IdentityLabelMap::new();
        for key in keys {
            if !map.index.contains_key(&key) {
                map.index.insert(key.clone(), map.keys.len() as u32);
                map.keys.push(key);
            }
        }
        map
    }
}

impl From<IdentityLabelMap> for Vec<String> {
    fn from(map: IdentityLabelMap) -> Self {
        map.keys
    }
}
