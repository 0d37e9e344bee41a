//! # Vocabulary
//!
//! The read-only provider of vocabulary sizes consulted by every stage
//! builder, and the alphabet collection that backs it in a real run.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::error::{Result, TwpipeError};
use crate::store::ModelStore;

/// Namespace the alphabet is recorded under in a model artifact.
pub const ALPHABET_NAMESPACE: &str = "alphabet";

/// A kind of vocabulary whose size feeds a hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VocabCategory {
    Characters,
    Words,
    Tags,
    Clusters,
}

impl VocabCategory {
    /// All categories, in artifact order.
    pub const ALL: [VocabCategory; 4] = [
        VocabCategory::Characters,
        VocabCategory::Words,
        VocabCategory::Tags,
        VocabCategory::Clusters,
    ];

    /// Field name used when the alphabet is persisted.
    pub fn field_name(self) -> &'static str {
        match self {
            VocabCategory::Characters => "chars",
            VocabCategory::Words => "words",
            VocabCategory::Tags => "tags",
            VocabCategory::Clusters => "clusters",
        }
    }
}

impl fmt::Display for VocabCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Source of vocabulary sizes. Populated once before any builder runs and
/// immutable afterwards.
///
/// A size of zero means "no expectation": reconstruction then adopts
/// whatever the artifact recorded.
pub trait VocabularyProvider {
    /// Number of distinct entries in `category`.
    fn size_of(&self, category: VocabCategory) -> u32;
}

/// Plain vocabulary sizes, for expectations supplied on the command line
/// and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VocabularySizes {
    pub characters: u32,
    pub words: u32,
    pub tags: u32,
    pub clusters: u32,
}

impl VocabularySizes {
    /// Sizes with every category at zero.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Copies every size from another provider.
    pub fn from_provider(provider: &dyn VocabularyProvider) -> Self {
        Self {
            characters: provider.size_of(VocabCategory::Characters),
            words: provider.size_of(VocabCategory::Words),
            tags: provider.size_of(VocabCategory::Tags),
            clusters: provider.size_of(VocabCategory::Clusters),
        }
    }
}

impl VocabularyProvider for VocabularySizes {
    fn size_of(&self, category: VocabCategory) -> u32 {
        match category {
            VocabCategory::Characters => self.characters,
            VocabCategory::Words => self.words,
            VocabCategory::Tags => self.tags,
            VocabCategory::Clusters => self.clusters,
        }
    }
}

/// An insertion-ordered string interner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alphabet {
    items: Vec<String>,
    index: HashMap<String, u32>,
}

impl Alphabet {
    /// Creates an empty alphabet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `item`, adding it if unseen.
    pub fn insert(&mut self, item: &str) -> u32 {
        if let Some(&id) = self.index.get(item) {
            return id;
        }
        let id = self.items.len() as u32;
        self.items.push(item.to_string());
        self.index.insert(item.to_string(), id);
        id
    }

    /// Id of `item`, if present.
    pub fn get(&self, item: &str) -> Option<u32> {
        self.index.get(item).copied()
    }

    /// Number of distinct entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries in id order.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    fn from_items(items: Vec<String>) -> Self {
        let mut alphabet = Alphabet::new();
        for item in &items {
            alphabet.insert(item);
        }
        alphabet
    }
}

/// The character, word, tag and cluster alphabets of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlphabetCollection {
    pub chars: Alphabet,
    pub words: Alphabet,
    pub tags: Alphabet,
    pub clusters: Alphabet,
}

impl AlphabetCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    fn alphabet(&self, category: VocabCategory) -> &Alphabet {
        match category {
            VocabCategory::Characters => &self.chars,
            VocabCategory::Words => &self.words,
            VocabCategory::Tags => &self.tags,
            VocabCategory::Clusters => &self.clusters,
        }
    }

    fn alphabet_mut(&mut self, category: VocabCategory) -> &mut Alphabet {
        match category {
            VocabCategory::Characters => &mut self.chars,
            VocabCategory::Words => &mut self.words,
            VocabCategory::Tags => &mut self.tags,
            VocabCategory::Clusters => &mut self.clusters,
        }
    }

    /// Records every alphabet under [`ALPHABET_NAMESPACE`], one JSON array
    /// per category.
    pub fn save(&self, store: &mut ModelStore) -> Result<()> {
        for category in VocabCategory::ALL {
            let items = serde_json::to_string(self.alphabet(category).items())?;
            store.put(ALPHABET_NAMESPACE, category.field_name(), items)?;
        }
        debug!(
            chars = self.chars.len(),
            words = self.words.len(),
            tags = self.tags.len(),
            clusters = self.clusters.len(),
            "[alphabet] saved"
        );
        Ok(())
    }

    /// Restores the alphabets recorded by [`AlphabetCollection::save`].
    pub fn load(store: &ModelStore) -> Result<Self> {
        let mut collection = AlphabetCollection::new();
        for category in VocabCategory::ALL {
            let raw = store
                .get(ALPHABET_NAMESPACE, category.field_name())
                .ok_or_else(|| {
                    TwpipeError::corrupt(
                        ALPHABET_NAMESPACE,
                        format!("missing field {:?}", category.field_name()),
                    )
                })?;
            let items: Vec<String> = serde_json::from_str(raw).map_err(|e| {
                TwpipeError::corrupt(
                    ALPHABET_NAMESPACE,
                    format!("malformed field {:?}: {e}", category.field_name()),
                )
            })?;
            *collection.alphabet_mut(category) = Alphabet::from_items(items);
        }
        Ok(collection)
    }
}

impl VocabularyProvider for AlphabetCollection {
    fn size_of(&self, category: VocabCategory) -> u32 {
        self.alphabet(category).len() as u32
    }
}
