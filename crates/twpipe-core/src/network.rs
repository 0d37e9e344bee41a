//! # Stage Networks
//!
//! Topologies of the tokenizer, tagger and parser variants, wired inside a
//! [`ParameterCollection`] with the dimensions of a resolved
//! [`HyperparameterSet`].

use candle_core::Tensor;
use candle_nn::{Embedding, Linear, Module};

use crate::catalog::RnnCell;
use crate::engine::{ParameterCollection, RecurrentStack};
use crate::error::Result;
use crate::hyperparams::{Hyperparam, HyperparameterSet};

/// Longest segment the segmental tokenizer scores.
pub const MAX_SEGMENT_LEN: usize = 32;

/// Labels of the linear tokenizer: start a new token, or append.
pub const NUM_BOUNDARY_LABELS: usize = 2;

/// Number of configuration features fed to the parser's action scorer
/// (top two stack items and the front of the buffer).
pub const PARSER_FEATURES: usize = 3;

fn dim(hyperparams: &HyperparameterSet, key: Hyperparam) -> usize {
    hyperparams.get(key) as usize
}

/// Character embedding followed by a recurrent stack.
#[derive(Debug, Clone)]
pub struct CharEncoder {
    pub embedding: Embedding,
    pub rnn: RecurrentStack,
}

impl CharEncoder {
    fn new(
        params: &mut ParameterCollection,
        prefix: &str,
        cell: RnnCell,
        hyperparams: &HyperparameterSet,
    ) -> Result<Self> {
        let char_dim = dim(hyperparams, Hyperparam::CharDim);
        let hidden = dim(hyperparams, Hyperparam::CharHiddenDim);
        Ok(Self {
            embedding: params.embedding(
                &format!("{prefix}.embedding"),
                dim(hyperparams, Hyperparam::CharSize),
                char_dim,
            )?,
            rnn: params.recurrent(
                &format!("{prefix}.rnn"),
                cell,
                char_dim,
                hidden,
                dim(hyperparams, Hyperparam::CharNLayers),
            )?,
        })
    }

    /// Encodes character ids of shape `(batch, seq_len)` into hidden states
    /// of shape `(batch, seq_len, char-hidden-dim)`.
    pub fn forward(&self, char_ids: &Tensor) -> Result<Tensor> {
        let embedded = self.embedding.forward(char_ids)?;
        self.rnn.forward(&embedded)
    }
}

/// Output head of a tokenizer.
#[derive(Debug, Clone)]
pub enum TokenizeHead {
    /// Per-character boundary labelling.
    Linear { scorer: Linear },
    /// Semi-Markov segment scoring from the span's endpoints and length.
    Segmental {
        segment: Linear,
        duration: Embedding,
        scorer: Linear,
    },
}

/// Character-level tokenizer.
#[derive(Debug, Clone)]
pub struct TokenizeModel {
    pub char_encoder: CharEncoder,
    pub head: TokenizeHead,
}

impl TokenizeModel {
    pub(crate) fn linear(
        params: &mut ParameterCollection,
        cell: RnnCell,
        hyperparams: &HyperparameterSet,
    ) -> Result<Self> {
        let char_encoder = CharEncoder::new(params, "char_encoder", cell, hyperparams)?;
        let scorer = params.linear(
            "boundary_scorer",
            dim(hyperparams, Hyperparam::CharHiddenDim),
            NUM_BOUNDARY_LABELS,
        )?;
        Ok(Self {
            char_encoder,
            head: TokenizeHead::Linear { scorer },
        })
    }

    pub(crate) fn segmental(
        params: &mut ParameterCollection,
        cell: RnnCell,
        hyperparams: &HyperparameterSet,
    ) -> Result<Self> {
        let char_encoder = CharEncoder::new(params, "char_encoder", cell, hyperparams)?;
        let hidden = dim(hyperparams, Hyperparam::CharHiddenDim);
        let seg_dim = dim(hyperparams, Hyperparam::SegDim);
        let dur_dim = dim(hyperparams, Hyperparam::DurDim);
        let segment = params.linear("segment", 2 * hidden, seg_dim)?;
        let duration = params.embedding("duration", MAX_SEGMENT_LEN, dur_dim)?;
        let scorer = params.linear("segment_scorer", seg_dim + dur_dim, 1)?;
        Ok(Self {
            char_encoder,
            head: TokenizeHead::Segmental {
                segment,
                duration,
                scorer,
            },
        })
    }
}

/// Recurrent encoder over a word's cluster path.
#[derive(Debug, Clone)]
pub struct ClusterEncoder {
    pub embedding: Embedding,
    pub rnn: RecurrentStack,
}

/// Part-of-speech tagger.
#[derive(Debug, Clone)]
pub struct PostagModel {
    pub char_encoder: CharEncoder,
    pub cluster_encoder: Option<ClusterEncoder>,
    /// Width of the external pretrained word vectors, zero when unused.
    pub embedding_dim: usize,
    pub word_rnn: RecurrentStack,
    pub tag_projection: Linear,
    pub tag_scorer: Linear,
    /// CRF transition scores, present for `-crf` variants.
    pub transitions: Option<Tensor>,
}

/// Optional parts of a tagger topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PostagTopology {
    pub crf: bool,
    pub clusters: bool,
}

impl PostagModel {
    pub(crate) fn new(
        params: &mut ParameterCollection,
        cell: RnnCell,
        topology: PostagTopology,
        hyperparams: &HyperparameterSet,
    ) -> Result<Self> {
        let char_encoder = CharEncoder::new(params, "char_encoder", cell, hyperparams)?;
        let embedding_dim = dim(hyperparams, Hyperparam::EmbeddingDim);
        let mut word_input = dim(hyperparams, Hyperparam::CharHiddenDim) + embedding_dim;

        let cluster_encoder = if topology.clusters {
            let cluster_dim = dim(hyperparams, Hyperparam::ClusterDim);
            let cluster_hidden = dim(hyperparams, Hyperparam::ClusterHiddenDim);
            word_input += cluster_hidden;
            Some(ClusterEncoder {
                embedding: params.embedding(
                    "cluster_encoder.embedding",
                    dim(hyperparams, Hyperparam::ClusterSize),
                    cluster_dim,
                )?,
                rnn: params.recurrent(
                    "cluster_encoder.rnn",
                    cell,
                    cluster_dim,
                    cluster_hidden,
                    dim(hyperparams, Hyperparam::ClusterNLayers),
                )?,
            })
        } else {
            None
        };

        let word_hidden = dim(hyperparams, Hyperparam::WordHiddenDim);
        let tag_dim = dim(hyperparams, Hyperparam::TagDim);
        let n_tags = dim(hyperparams, Hyperparam::TagSize);

        let word_rnn = params.recurrent(
            "word_rnn",
            cell,
            word_input,
            word_hidden,
            dim(hyperparams, Hyperparam::WordNLayers),
        )?;
        let tag_projection = params.linear("tag_projection", word_hidden, tag_dim)?;
        let tag_scorer = params.linear("tag_scorer", tag_dim, n_tags)?;
        let transitions = if topology.crf {
            Some(params.transitions("crf", n_tags)?)
        } else {
            None
        };

        Ok(Self {
            char_encoder,
            cluster_encoder,
            embedding_dim,
            word_rnn,
            tag_projection,
            tag_scorer,
            transitions,
        })
    }
}

/// Transition system of a parser variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSystem {
    /// SHIFT, LEFT-ARC, RIGHT-ARC.
    ArcStandard,
    /// SHIFT, REDUCE, LEFT-ARC, RIGHT-ARC.
    ArcEager,
}

impl TransitionSystem {
    pub fn num_actions(self) -> usize {
        match self {
            TransitionSystem::ArcStandard => 3,
            TransitionSystem::ArcEager => 4,
        }
    }
}

/// Unlabelled transition-based dependency parser.
#[derive(Debug, Clone)]
pub struct ParseModel {
    pub system: TransitionSystem,
    pub word_embedding: Embedding,
    pub tag_embedding: Embedding,
    pub rnn: RecurrentStack,
    pub action_scorer: Linear,
}

impl ParseModel {
    pub(crate) fn new(
        params: &mut ParameterCollection,
        cell: RnnCell,
        system: TransitionSystem,
        hyperparams: &HyperparameterSet,
    ) -> Result<Self> {
        let word_dim = dim(hyperparams, Hyperparam::WordDim);
        let tag_dim = dim(hyperparams, Hyperparam::TagDim);
        let hidden = dim(hyperparams, Hyperparam::WordHiddenDim);

        let word_embedding =
            params.embedding("word_embedding", dim(hyperparams, Hyperparam::WordSize), word_dim)?;
        let tag_embedding =
            params.embedding("tag_embedding", dim(hyperparams, Hyperparam::TagSize), tag_dim)?;
        let rnn = params.recurrent(
            "rnn",
            cell,
            word_dim + tag_dim,
            hidden,
            dim(hyperparams, Hyperparam::WordNLayers),
        )?;
        let action_scorer =
            params.linear("action_scorer", PARSER_FEATURES * hidden, system.num_actions())?;

        Ok(Self {
            system,
            word_embedding,
            tag_embedding,
            rnn,
            action_scorer,
        })
    }
}

/// Wiring of a stage network, independent of its recurrent cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Topology {
    LinearTokenizer,
    SegmentalTokenizer,
    Postagger(PostagTopology),
    Parser(TransitionSystem),
}

impl Topology {
    /// Allocates the network in `params`.
    pub(crate) fn build(
        self,
        params: &mut ParameterCollection,
        cell: RnnCell,
        hyperparams: &HyperparameterSet,
    ) -> Result<Network> {
        match self {
            Topology::LinearTokenizer => {
                TokenizeModel::linear(params, cell, hyperparams).map(Network::Tokenizer)
            }
            Topology::SegmentalTokenizer => {
                TokenizeModel::segmental(params, cell, hyperparams).map(Network::Tokenizer)
            }
            Topology::Postagger(topology) => {
                PostagModel::new(params, cell, topology, hyperparams).map(Network::Postagger)
            }
            Topology::Parser(system) => {
                ParseModel::new(params, cell, system, hyperparams).map(Network::Parser)
            }
        }
    }

    /// Number of scalars [`Topology::build`] allocates, or `None` if it does
    /// not fit in a `usize`.
    pub(crate) fn parameter_count(
        self,
        cell: RnnCell,
        hyperparams: &HyperparameterSet,
    ) -> Option<usize> {
        let d = |key| dim(hyperparams, key);
        let char_encoder = || {
            sum(&[
                embedding_count(d(Hyperparam::CharSize), d(Hyperparam::CharDim)),
                recurrent_count(
                    cell,
                    d(Hyperparam::CharDim),
                    d(Hyperparam::CharHiddenDim),
                    d(Hyperparam::CharNLayers),
                ),
            ])
        };

        match self {
            Topology::LinearTokenizer => sum(&[
                char_encoder(),
                linear_count(d(Hyperparam::CharHiddenDim), NUM_BOUNDARY_LABELS),
            ]),
            Topology::SegmentalTokenizer => {
                let seg_dim = d(Hyperparam::SegDim);
                let dur_dim = d(Hyperparam::DurDim);
                sum(&[
                    char_encoder(),
                    linear_count(d(Hyperparam::CharHiddenDim).checked_mul(2)?, seg_dim),
                    embedding_count(MAX_SEGMENT_LEN, dur_dim),
                    linear_count(seg_dim.checked_add(dur_dim)?, 1),
                ])
            }
            Topology::Postagger(topology) => {
                let word_hidden = d(Hyperparam::WordHiddenDim);
                let tag_dim = d(Hyperparam::TagDim);
                let n_tags = d(Hyperparam::TagSize);
                let mut word_input =
                    d(Hyperparam::CharHiddenDim).checked_add(d(Hyperparam::EmbeddingDim))?;

                let mut parts = vec![char_encoder()];
                if topology.clusters {
                    let cluster_dim = d(Hyperparam::ClusterDim);
                    let cluster_hidden = d(Hyperparam::ClusterHiddenDim);
                    word_input = word_input.checked_add(cluster_hidden)?;
                    parts.push(embedding_count(d(Hyperparam::ClusterSize), cluster_dim));
                    parts.push(recurrent_count(
                        cell,
                        cluster_dim,
                        cluster_hidden,
                        d(Hyperparam::ClusterNLayers),
                    ));
                }
                parts.push(recurrent_count(
                    cell,
                    word_input,
                    word_hidden,
                    d(Hyperparam::WordNLayers),
                ));
                parts.push(linear_count(word_hidden, tag_dim));
                parts.push(linear_count(tag_dim, n_tags));
                if topology.crf {
                    parts.push(n_tags.checked_mul(n_tags));
                }
                sum(&parts)
            }
            Topology::Parser(system) => {
                let word_dim = d(Hyperparam::WordDim);
                let tag_dim = d(Hyperparam::TagDim);
                let hidden = d(Hyperparam::WordHiddenDim);
                sum(&[
                    embedding_count(d(Hyperparam::WordSize), word_dim),
                    embedding_count(d(Hyperparam::TagSize), tag_dim),
                    recurrent_count(
                        cell,
                        word_dim.checked_add(tag_dim)?,
                        hidden,
                        d(Hyperparam::WordNLayers),
                    ),
                    linear_count(PARSER_FEATURES.checked_mul(hidden)?, system.num_actions()),
                ])
            }
        }
    }
}

fn sum(parts: &[Option<usize>]) -> Option<usize> {
    parts
        .iter()
        .try_fold(0usize, |total, part| total.checked_add((*part)?))
}

fn embedding_count(vocab: usize, dim: usize) -> Option<usize> {
    vocab.checked_mul(dim)
}

fn linear_count(input: usize, output: usize) -> Option<usize> {
    input.checked_mul(output)?.checked_add(output)
}

fn recurrent_count(cell: RnnCell, input: usize, hidden: usize, layers: usize) -> Option<usize> {
    if layers == 0 {
        return Some(0);
    }
    let gates: usize = match cell {
        RnnCell::Gru => 3,
        RnnCell::Lstm => 4,
    };
    // input and hidden weights plus both biases
    let layer = |input: usize| -> Option<usize> {
        gates
            .checked_mul(hidden)?
            .checked_mul(input.checked_add(hidden)?.checked_add(2)?)
    };
    layer(input)?.checked_add(layer(hidden)?.checked_mul(layers - 1)?)
}

/// A constructed stage network.
#[derive(Debug, Clone)]
pub enum Network {
    Tokenizer(TokenizeModel),
    Postagger(PostagModel),
    Parser(ParseModel),
}

impl Network {
    pub fn as_tokenizer(&self) -> Option<&TokenizeModel> {
        match self {
            Network::Tokenizer(model) => Some(model),
            _ => None,
        }
    }

    pub fn as_postagger(&self) -> Option<&PostagModel> {
        match self {
            Network::Postagger(model) => Some(model),
            _ => None,
        }
    }

    pub fn as_parser(&self) -> Option<&ParseModel> {
        match self {
            Network::Parser(model) => Some(model),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn tagger_hyperparams() -> HyperparameterSet {
        HyperparameterSet::new()
            .with(Hyperparam::CharSize, 50)
            .with(Hyperparam::CharDim, 16)
            .with(Hyperparam::CharHiddenDim, 32)
            .with(Hyperparam::CharNLayers, 1)
            .with(Hyperparam::WordHiddenDim, 64)
            .with(Hyperparam::WordNLayers, 1)
            .with(Hyperparam::TagDim, 8)
            .with(Hyperparam::TagSize, 12)
    }

    #[test]
    fn tagger_wiring_follows_hyperparameters() {
        let mut params = ParameterCollection::cpu();
        let hyperparams = tagger_hyperparams()
            .with(Hyperparam::EmbeddingDim, 100)
            .with(Hyperparam::ClusterSize, 30)
            .with(Hyperparam::ClusterDim, 4)
            .with(Hyperparam::ClusterHiddenDim, 10)
            .with(Hyperparam::ClusterNLayers, 1);
        let topology = PostagTopology {
            crf: true,
            clusters: true,
        };
        let model = PostagModel::new(&mut params, RnnCell::Lstm, topology, &hyperparams).unwrap();

        assert!(model.transitions.is_some());
        assert!(model.cluster_encoder.is_some());
        assert_eq!(model.embedding_dim, 100);

        let shapes = params.shapes().unwrap();
        assert_eq!(shapes["char_encoder.embedding.weight"], [50, 16]);
        assert_eq!(shapes["cluster_encoder.embedding.weight"], [30, 4]);
        // LSTM input weights are (4 * hidden, input); input = 32 + 100 + 10.
        assert_eq!(shapes["word_rnn.l0.weight_ih_l0"], [256, 142]);
        assert_eq!(shapes["tag_projection.weight"], [8, 64]);
        assert_eq!(shapes["tag_scorer.weight"], [12, 8]);
        assert_eq!(shapes["crf.weight"], [12, 12]);
    }

    #[test]
    fn plain_tagger_has_no_optional_parts() {
        let mut params = ParameterCollection::cpu();
        let model = PostagModel::new(
            &mut params,
            RnnCell::Gru,
            PostagTopology::default(),
            &tagger_hyperparams(),
        )
        .unwrap();
        assert!(model.transitions.is_none());
        assert!(model.cluster_encoder.is_none());
        // GRU input weights are (3 * hidden, input).
        assert_eq!(params.shapes().unwrap()["word_rnn.l0.weight_ih_l0"], [192, 32]);
    }

    #[test]
    fn char_encoder_forward() {
        let mut params = ParameterCollection::cpu();
        let model =
            TokenizeModel::linear(&mut params, RnnCell::Gru, &tagger_hyperparams()).unwrap();
        let ids = Tensor::new(&[[1u32, 4, 9]], params.device()).unwrap();
        let hidden = model.char_encoder.forward(&ids).unwrap();
        assert_eq!(hidden.dims(), [1, 3, 32]);
        assert_eq!(hidden.dtype(), DType::F32);

        let deep = tagger_hyperparams().with(Hyperparam::CharNLayers, 3);
        let mut params = ParameterCollection::cpu();
        let model = TokenizeModel::linear(&mut params, RnnCell::Gru, &deep).unwrap();
        let ids = Tensor::new(&[[1u32, 4, 9, 2], [0, 3, 3, 7]], params.device()).unwrap();
        assert_eq!(model.char_encoder.forward(&ids).unwrap().dims(), [2, 4, 32]);
    }

    #[test]
    fn parameter_count_matches_allocation() {
        let hyperparams = tagger_hyperparams()
            .with(Hyperparam::CharNLayers, 2)
            .with(Hyperparam::WordNLayers, 3)
            .with(Hyperparam::EmbeddingDim, 7)
            .with(Hyperparam::ClusterSize, 30)
            .with(Hyperparam::ClusterDim, 4)
            .with(Hyperparam::ClusterHiddenDim, 10)
            .with(Hyperparam::ClusterNLayers, 2)
            .with(Hyperparam::SegDim, 6)
            .with(Hyperparam::DurDim, 5)
            .with(Hyperparam::WordSize, 300)
            .with(Hyperparam::WordDim, 9);
        let topologies = [
            Topology::LinearTokenizer,
            Topology::SegmentalTokenizer,
            Topology::Postagger(PostagTopology::default()),
            Topology::Postagger(PostagTopology {
                crf: true,
                clusters: true,
            }),
            Topology::Parser(TransitionSystem::ArcStandard),
            Topology::Parser(TransitionSystem::ArcEager),
        ];
        for topology in topologies {
            for cell in [RnnCell::Gru, RnnCell::Lstm] {
                let mut params = ParameterCollection::cpu();
                topology.build(&mut params, cell, &hyperparams).unwrap();
                assert_eq!(
                    topology.parameter_count(cell, &hyperparams),
                    Some(params.num_parameters().unwrap()),
                    "{topology:?} {cell:?}"
                );
            }
        }
    }

    #[test]
    fn parameter_count_overflow_is_none() {
        let hyperparams = tagger_hyperparams()
            .with(Hyperparam::CharSize, u32::MAX)
            .with(Hyperparam::CharDim, u32::MAX)
            .with(Hyperparam::CharHiddenDim, u32::MAX)
            .with(Hyperparam::CharNLayers, u32::MAX);
        assert_eq!(
            Topology::LinearTokenizer.parameter_count(RnnCell::Lstm, &hyperparams),
            None
        );
    }

    #[test]
    fn parser_action_space() {
        let hyperparams = HyperparameterSet::new()
            .with(Hyperparam::WordSize, 1000)
            .with(Hyperparam::WordDim, 32)
            .with(Hyperparam::TagSize, 17)
            .with(Hyperparam::TagDim, 8)
            .with(Hyperparam::WordHiddenDim, 20)
            .with(Hyperparam::WordNLayers, 2);

        for (system, actions) in [
            (TransitionSystem::ArcStandard, 3),
            (TransitionSystem::ArcEager, 4),
        ] {
            let mut params = ParameterCollection::cpu();
            ParseModel::new(&mut params, RnnCell::Lstm, system, &hyperparams).unwrap();
            let shapes = params.shapes().unwrap();
            assert_eq!(shapes["action_scorer.weight"], [actions, 60]);
            assert_eq!(shapes["rnn.l1.weight_ih_l0"], [80, 20]);
        }
    }
}
