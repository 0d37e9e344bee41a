//! # twpipe Trainer
//!
//! Drivers around the core registry: alphabet construction from CoNLL-U
//! corpora and cluster files, stage configuration from the command line or
//! a JSON file, and the training and loading paths that write and read a
//! model artifact.

pub mod config;
pub mod data;
pub mod pipeline;

pub use config::{PipelineArgs, resolve_pipeline};
pub use data::{CorpusStats, load_clusters, load_conllu, load_embedding_dim};
pub use pipeline::{
    InitialWeights, LoadRequest, LoadedPipeline, LoadedStage, StageTrainer, init_artifact,
    load_pipeline,
};
