//! # Variant Catalog
//!
//! The closed set of architectures each pipeline stage can be configured
//! with. A descriptor names the hyperparameters its variant needs, grouped
//! into records in the exact order they are written to, and read back from,
//! a model artifact.

use std::fmt;

use crate::error::{Result, TwpipeError};
use crate::hyperparams::Hyperparam;

/// A phase of the pipeline, trained and persisted independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Tokenizer,
    Postagger,
    Parser,
}

impl Stage {
    /// All stages, in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Tokenizer, Stage::Postagger, Stage::Parser];

    /// Namespace of the stage in a model artifact.
    pub fn namespace(self) -> &'static str {
        match self {
            Stage::Tokenizer => "tokenizer",
            Stage::Postagger => "postagger",
            Stage::Parser => "parser",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Recurrent cell used by a variant's encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RnnCell {
    Gru,
    Lstm,
}

/// Identifies one architecture across every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantTag {
    LinearGru,
    LinearLstm,
    SegmentalGru,
    SegmentalLstm,
    CharGru,
    CharLstm,
    CharGruCrf,
    CharLstmCrf,
    CharGruWithCluster,
    CharLstmWithCluster,
    ArcStandardGru,
    ArcStandardLstm,
    ArcEagerGru,
    ArcEagerLstm,
}

impl VariantTag {
    /// Recurrent cell of the variant's encoders.
    pub fn cell(self) -> RnnCell {
        match self {
            VariantTag::LinearGru
            | VariantTag::SegmentalGru
            | VariantTag::CharGru
            | VariantTag::CharGruCrf
            | VariantTag::CharGruWithCluster
            | VariantTag::ArcStandardGru
            | VariantTag::ArcEagerGru => RnnCell::Gru,
            VariantTag::LinearLstm
            | VariantTag::SegmentalLstm
            | VariantTag::CharLstm
            | VariantTag::CharLstmCrf
            | VariantTag::CharLstmWithCluster
            | VariantTag::ArcStandardLstm
            | VariantTag::ArcEagerLstm => RnnCell::Lstm,
        }
    }
}

/// Static description of one variant.
#[derive(Debug, PartialEq, Eq)]
pub struct VariantDescriptor {
    /// Configuration name, e.g. `"char-lstm-crf"`.
    pub name: &'static str,
    pub stage: Stage,
    pub tag: VariantTag,
    /// Recorded hyperparameters, grouped into records in artifact order.
    /// The first record is the stage's core record; clustering variants add
    /// a second one.
    pub records: &'static [&'static [Hyperparam]],
    /// Recorded hyperparameters that may be zero and are never validated.
    pub optional: &'static [Hyperparam],
}

impl VariantDescriptor {
    /// Every recorded hyperparameter, in artifact order.
    pub fn fields(&self) -> impl Iterator<Item = Hyperparam> {
        self.records.iter().flat_map(|record| record.iter().copied())
    }

    /// Recorded hyperparameters that must be non-zero, in artifact order.
    pub fn required(&self) -> impl Iterator<Item = Hyperparam> {
        self.fields().filter(|key| !self.optional.contains(key))
    }

    /// Whether `key` must be non-zero for this variant.
    pub fn requires(&self, key: Hyperparam) -> bool {
        self.required().any(|k| k == key)
    }

    /// Whether the variant carries a cluster sub-network.
    pub fn uses_clusters(&self) -> bool {
        self.requires(Hyperparam::ClusterSize)
    }
}

const TOKENIZER_RECORD: &[Hyperparam] = &[
    Hyperparam::CharSize,
    Hyperparam::CharDim,
    Hyperparam::CharHiddenDim,
    Hyperparam::CharNLayers,
];

const SEGMENT_RECORD: &[Hyperparam] = &[Hyperparam::SegDim, Hyperparam::DurDim];

const POSTAGGER_RECORD: &[Hyperparam] = &[
    Hyperparam::CharSize,
    Hyperparam::CharDim,
    Hyperparam::CharHiddenDim,
    Hyperparam::CharNLayers,
    Hyperparam::WordHiddenDim,
    Hyperparam::WordNLayers,
    Hyperparam::TagDim,
    Hyperparam::TagSize,
    Hyperparam::EmbeddingDim,
];

const CLUSTER_RECORD: &[Hyperparam] = &[
    Hyperparam::ClusterSize,
    Hyperparam::ClusterDim,
    Hyperparam::ClusterHiddenDim,
    Hyperparam::ClusterNLayers,
];

const PARSER_RECORD: &[Hyperparam] = &[
    Hyperparam::WordSize,
    Hyperparam::WordDim,
    Hyperparam::TagSize,
    Hyperparam::TagDim,
    Hyperparam::WordHiddenDim,
    Hyperparam::WordNLayers,
];

const POSTAGGER_OPTIONAL: &[Hyperparam] = &[Hyperparam::EmbeddingDim];

const LINEAR_TOKENIZER_RECORDS: &[&[Hyperparam]] = &[TOKENIZER_RECORD];
const SEGMENTAL_TOKENIZER_RECORDS: &[&[Hyperparam]] = &[TOKENIZER_RECORD, SEGMENT_RECORD];
const POSTAGGER_RECORDS: &[&[Hyperparam]] = &[POSTAGGER_RECORD];
const CLUSTER_POSTAGGER_RECORDS: &[&[Hyperparam]] = &[POSTAGGER_RECORD, CLUSTER_RECORD];
const PARSER_RECORDS: &[&[Hyperparam]] = &[PARSER_RECORD];

const fn tokenizer(name: &'static str, tag: VariantTag, segmental: bool) -> VariantDescriptor {
    VariantDescriptor {
        name,
        stage: Stage::Tokenizer,
        tag,
        records: if segmental {
            SEGMENTAL_TOKENIZER_RECORDS
        } else {
            LINEAR_TOKENIZER_RECORDS
        },
        optional: &[],
    }
}

const fn postagger(name: &'static str, tag: VariantTag, cluster: bool) -> VariantDescriptor {
    VariantDescriptor {
        name,
        stage: Stage::Postagger,
        tag,
        records: if cluster {
            CLUSTER_POSTAGGER_RECORDS
        } else {
            POSTAGGER_RECORDS
        },
        optional: POSTAGGER_OPTIONAL,
    }
}

const fn parser(name: &'static str, tag: VariantTag) -> VariantDescriptor {
    VariantDescriptor {
        name,
        stage: Stage::Parser,
        tag,
        records: PARSER_RECORDS,
        optional: &[],
    }
}

static TOKENIZER_VARIANTS: [VariantDescriptor; 4] = [
    tokenizer("linear-gru", VariantTag::LinearGru, false),
    tokenizer("linear-lstm", VariantTag::LinearLstm, false),
    tokenizer("segmental-gru", VariantTag::SegmentalGru, true),
    tokenizer("segmental-lstm", VariantTag::SegmentalLstm, true),
];

static POSTAGGER_VARIANTS: [VariantDescriptor; 6] = [
    postagger("char-gru", VariantTag::CharGru, false),
    postagger("char-lstm", VariantTag::CharLstm, false),
    postagger("char-gru-crf", VariantTag::CharGruCrf, false),
    postagger("char-lstm-crf", VariantTag::CharLstmCrf, false),
    postagger("char-gru-wcluster", VariantTag::CharGruWithCluster, true),
    postagger("char-lstm-wcluster", VariantTag::CharLstmWithCluster, true),
];

static PARSER_VARIANTS: [VariantDescriptor; 4] = [
    parser("arcstd-gru", VariantTag::ArcStandardGru),
    parser("arcstd-lstm", VariantTag::ArcStandardLstm),
    parser("arceager-gru", VariantTag::ArcEagerGru),
    parser("arceager-lstm", VariantTag::ArcEagerLstm),
];

/// Every variant available to `stage`.
pub fn variants(stage: Stage) -> &'static [VariantDescriptor] {
    match stage {
        Stage::Tokenizer => &TOKENIZER_VARIANTS,
        Stage::Postagger => &POSTAGGER_VARIANTS,
        Stage::Parser => &PARSER_VARIANTS,
    }
}

/// Resolves a configuration name to its descriptor.
pub fn lookup(stage: Stage, name: &str) -> Result<&'static VariantDescriptor> {
    variants(stage)
        .iter()
        .find(|descriptor| descriptor.name == name)
        .ok_or_else(|| TwpipeError::UnknownVariant {
            stage,
            name: name.to_string(),
        })
}
