//! # twpipe Core
//!
//! Model variant registry and persistence protocol of the twpipe pipeline.
//! Each stage (tokenizer, postagger, parser) is configured with one variant
//! from a closed catalog; its hyperparameters are recorded in a model
//! artifact next to the trained parameters, so that the exact same network
//! can be rebuilt and loaded later.
//!
//! ## Quick Start
//!
//! ```rust
//! use twpipe_core::{
//!     Hyperparam, HyperparameterSet, ModelBuilder, ModelStore, ParameterCollection, Stage,
//!     VocabularySizes,
//! };
//!
//! let vocab = VocabularySizes { characters: 50, tags: 12, ..VocabularySizes::unknown() };
//! let hyperparams = HyperparameterSet::new()
//!     .with(Hyperparam::CharDim, 16)
//!     .with(Hyperparam::CharHiddenDim, 32)
//!     .with(Hyperparam::CharNLayers, 1)
//!     .with(Hyperparam::WordHiddenDim, 64)
//!     .with(Hyperparam::WordNLayers, 1)
//!     .with(Hyperparam::TagDim, 8);
//!
//! let builder =
//!     ModelBuilder::new(Stage::Postagger, "char-lstm-crf", hyperparams, &vocab).unwrap();
//! let mut params = ParameterCollection::cpu();
//! builder.build(&mut params).unwrap();
//!
//! let mut store = ModelStore::in_memory();
//! builder.serialize(&mut store).unwrap();
//! builder.save_parameters(&params, &mut store).unwrap();
//!
//! let mut restored = ParameterCollection::cpu();
//! let (rebuilt, _network) =
//!     ModelBuilder::reconstruct(Stage::Postagger, &vocab, &store, &mut restored).unwrap();
//! assert_eq!(rebuilt, builder);
//! ```
pub mod builder;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod hyperparams;
pub mod network;
pub mod store;
pub mod vocab;

// Re-export primary API
pub use builder::ModelBuilder;
pub use catalog::{RnnCell, Stage, VariantDescriptor, VariantTag};
pub use config::{PipelineConfig, StageConfig};
pub use engine::{LayerSpec, ParameterCollection};
pub use error::{Result, TwpipeError};
pub use hyperparams::{Hyperparam, HyperparameterSet};
pub use network::{Network, ParseModel, PostagModel, TokenizeModel, TransitionSystem};
pub use store::ModelStore;
pub use vocab::{
    ALPHABET_NAMESPACE, Alphabet, AlphabetCollection, VocabCategory, VocabularyProvider,
    VocabularySizes,
};
