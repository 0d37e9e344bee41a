//! # twpipe
//!
//! Neural tokenizer, part-of-speech tagger and dependency parser pipeline
//! whose model artifacts record enough to rebuild every stage exactly.
//!
//! This crate re-exports [`twpipe_core`] (variant catalog, model builder,
//! model store) and [`twpipe_trainer`] (corpus loading and drivers).

pub use twpipe_core::*;
pub use twpipe_trainer as trainer;
