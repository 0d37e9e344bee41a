//! # Hyperparameters
//!
//! The integer dimensions that fix a variant's shape, and the set type that
//! carries them from configuration through build, serialize and reconstruct.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TwpipeError;
use crate::vocab::VocabCategory;

/// A hyperparameter key. The field name doubles as the artifact field and,
/// with a stage prefix, as the command-line option name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hyperparam {
    CharSize,
    WordSize,
    TagSize,
    ClusterSize,
    CharDim,
    CharHiddenDim,
    CharNLayers,
    WordDim,
    WordHiddenDim,
    WordNLayers,
    ClusterDim,
    ClusterHiddenDim,
    ClusterNLayers,
    EmbeddingDim,
    TagDim,
    SegDim,
    DurDim,
}

impl Hyperparam {
    /// Number of distinct keys.
    pub const COUNT: usize = 17;

    /// All keys, in declaration order.
    pub const ALL: [Hyperparam; Self::COUNT] = [
        Hyperparam::CharSize,
        Hyperparam::WordSize,
        Hyperparam::TagSize,
        Hyperparam::ClusterSize,
        Hyperparam::CharDim,
        Hyperparam::CharHiddenDim,
        Hyperparam::CharNLayers,
        Hyperparam::WordDim,
        Hyperparam::WordHiddenDim,
        Hyperparam::WordNLayers,
        Hyperparam::ClusterDim,
        Hyperparam::ClusterHiddenDim,
        Hyperparam::ClusterNLayers,
        Hyperparam::EmbeddingDim,
        Hyperparam::TagDim,
        Hyperparam::SegDim,
        Hyperparam::DurDim,
    ];

    /// Name of the field in the artifact.
    pub fn field_name(self) -> &'static str {
        match self {
            Hyperparam::CharSize => "n-chars",
            Hyperparam::WordSize => "n-words",
            Hyperparam::TagSize => "n-tags",
            Hyperparam::ClusterSize => "n-clusters",
            Hyperparam::CharDim => "char-dim",
            Hyperparam::CharHiddenDim => "char-hidden-dim",
            Hyperparam::CharNLayers => "char-n-layers",
            Hyperparam::WordDim => "word-dim",
            Hyperparam::WordHiddenDim => "word-hidden-dim",
            Hyperparam::WordNLayers => "word-n-layers",
            Hyperparam::ClusterDim => "cluster-dim",
            Hyperparam::ClusterHiddenDim => "cluster-hidden-dim",
            Hyperparam::ClusterNLayers => "cluster-n-layers",
            Hyperparam::EmbeddingDim => "embedding-dim",
            Hyperparam::TagDim => "tag-dim",
            Hyperparam::SegDim => "seg-dim",
            Hyperparam::DurDim => "dur-dim",
        }
    }

    /// Look a key up by its field name.
    pub fn from_field_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.field_name() == name)
    }

    /// The vocabulary category this key is derived from, if any.
    pub fn vocab_category(self) -> Option<VocabCategory> {
        match self {
            Hyperparam::CharSize => Some(VocabCategory::Characters),
            Hyperparam::WordSize => Some(VocabCategory::Words),
            Hyperparam::TagSize => Some(VocabCategory::Tags),
            Hyperparam::ClusterSize => Some(VocabCategory::Clusters),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Hyperparam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// A complete assignment of every [`Hyperparam`] to a `u32`.
///
/// Keys that were never supplied hold zero; there is no separate "unset"
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u32>", into = "BTreeMap<String, u32>")]
pub struct HyperparameterSet {
    values: [u32; Hyperparam::COUNT],
}

impl HyperparameterSet {
    /// Creates a set with every key at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `key`, zero when never supplied.
    pub fn get(&self, key: Hyperparam) -> u32 {
        self.values[key.index()]
    }

    /// Sets `key` to `value`.
    pub fn set(&mut self, key: Hyperparam, value: u32) {
        self.values[key.index()] = value;
    }

    /// Builder-style [`HyperparameterSet::set`].
    #[must_use]
    pub fn with(mut self, key: Hyperparam, value: u32) -> Self {
        self.set(key, value);
        self
    }

    /// Iterates over the non-zero entries.
    pub fn iter(&self) -> impl Iterator<Item = (Hyperparam, u32)> + '_ {
        Hyperparam::ALL
            .into_iter()
            .map(|key| (key, self.get(key)))
            .filter(|&(_, value)| value != 0)
    }
}

impl TryFrom<BTreeMap<String, u32>> for HyperparameterSet {
    type Error = TwpipeError;

    fn try_from(map: BTreeMap<String, u32>) -> Result<Self, Self::Error> {
        let mut set = HyperparameterSet::new();
        for (name, value) in map {
            let key = Hyperparam::from_field_name(&name)
                .ok_or(TwpipeError::UnknownHyperparameter(name))?;
            set.set(key, value);
        }
        Ok(set)
    }
}

impl From<HyperparameterSet> for BTreeMap<String, u32> {
    fn from(set: HyperparameterSet) -> Self {
        set.iter()
            .map(|(key, value)| (key.field_name().to_string(), value))
            .collect()
    }
}
