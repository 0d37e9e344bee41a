//! # Stage Model Builder
//!
//! Holds the resolved variant and hyperparameters of one stage and moves
//! them between configuration, network construction and the model store.
//!
//! Training path: [`ModelBuilder::new`] → [`ModelBuilder::serialize`] →
//! [`ModelBuilder::build`] → train → [`ModelBuilder::save_parameters`].
//!
//! Inference path: [`ModelBuilder::reconstruct`], which reads the recorded
//! variant and hyperparameters, checks them against the current vocabulary,
//! rebuilds the same network and loads the trained parameters into it.

use tracing::{debug, info};

use crate::catalog::{self, Stage, VariantDescriptor, VariantTag};
use crate::codec::{decode_scalar, encode_scalar};
use crate::config::StageConfig;
use crate::engine::{self, ParameterCollection};
use crate::error::{Result, TwpipeError};
use crate::hyperparams::{Hyperparam, HyperparameterSet};
use crate::network::{Network, PostagTopology, Topology, TransitionSystem};
use crate::store::ModelStore;
use crate::vocab::VocabularyProvider;

/// Field holding the variant name, always first in a stage namespace.
pub const NAME_FIELD: &str = "name";

/// One entry of the dispatch table.
struct Registration {
    tag: VariantTag,
    topology: Topology,
}

const TAGGER: Topology = Topology::Postagger(PostagTopology {
    crf: false,
    clusters: false,
});
const CRF_TAGGER: Topology = Topology::Postagger(PostagTopology {
    crf: true,
    clusters: false,
});
const CLUSTER_TAGGER: Topology = Topology::Postagger(PostagTopology {
    crf: false,
    clusters: true,
});
const ARC_STANDARD: Topology = Topology::Parser(TransitionSystem::ArcStandard);
const ARC_EAGER: Topology = Topology::Parser(TransitionSystem::ArcEager);

static REGISTRY: &[Registration] = &[
    Registration { tag: VariantTag::LinearGru, topology: Topology::LinearTokenizer },
    Registration { tag: VariantTag::LinearLstm, topology: Topology::LinearTokenizer },
    Registration { tag: VariantTag::SegmentalGru, topology: Topology::SegmentalTokenizer },
    Registration { tag: VariantTag::SegmentalLstm, topology: Topology::SegmentalTokenizer },
    Registration { tag: VariantTag::CharGru, topology: TAGGER },
    Registration { tag: VariantTag::CharLstm, topology: TAGGER },
    Registration { tag: VariantTag::CharGruCrf, topology: CRF_TAGGER },
    Registration { tag: VariantTag::CharLstmCrf, topology: CRF_TAGGER },
    Registration { tag: VariantTag::CharGruWithCluster, topology: CLUSTER_TAGGER },
    Registration { tag: VariantTag::CharLstmWithCluster, topology: CLUSTER_TAGGER },
    Registration { tag: VariantTag::ArcStandardGru, topology: ARC_STANDARD },
    Registration { tag: VariantTag::ArcStandardLstm, topology: ARC_STANDARD },
    Registration { tag: VariantTag::ArcEagerGru, topology: ARC_EAGER },
    Registration { tag: VariantTag::ArcEagerLstm, topology: ARC_EAGER },
];

fn topology(table: &[Registration], stage: Stage, tag: VariantTag) -> Result<Topology> {
    table
        .iter()
        .find(|registration| registration.tag == tag)
        .map(|registration| registration.topology)
        .ok_or(TwpipeError::UnreachableVariant { stage, tag })
}

/// Keeps only the keys `descriptor` records, so that hyperparameters the
/// variant never uses cannot leak into the artifact or the round trip.
fn restrict(descriptor: &VariantDescriptor, hyperparams: &HyperparameterSet) -> HyperparameterSet {
    let mut resolved = HyperparameterSet::new();
    for key in descriptor.fields() {
        resolved.set(key, hyperparams.get(key));
    }
    for (key, value) in hyperparams.iter() {
        if resolved.get(key) == 0 {
            debug!(
                stage = %descriptor.stage,
                variant = descriptor.name,
                field = key.field_name(),
                value,
                "[builder] hyperparameter not used by variant, ignored"
            );
        }
    }
    resolved
}

/// Variant and hyperparameters of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBuilder {
    descriptor: &'static VariantDescriptor,
    hyperparams: HyperparameterSet,
}

impl ModelBuilder {
    /// Resolves `variant` in the stage catalog and completes `hyperparams`
    /// with the vocabulary sizes `vocab` knows about.
    pub fn new(
        stage: Stage,
        variant: &str,
        mut hyperparams: HyperparameterSet,
        vocab: &dyn VocabularyProvider,
    ) -> Result<Self> {
        let descriptor = catalog::lookup(stage, variant)?;
        for key in Hyperparam::ALL {
            if let Some(category) = key.vocab_category() {
                let size = vocab.size_of(category);
                if size != 0 {
                    hyperparams.set(key, size);
                }
            }
        }
        Ok(Self {
            descriptor,
            hyperparams: restrict(descriptor, &hyperparams),
        })
    }

    /// [`ModelBuilder::new`] from a stage configuration.
    pub fn from_config(
        stage: Stage,
        config: &StageConfig,
        vocab: &dyn VocabularyProvider,
    ) -> Result<Self> {
        Self::new(stage, &config.variant, config.hyperparams, vocab)
    }

    pub fn stage(&self) -> Stage {
        self.descriptor.stage
    }

    pub fn descriptor(&self) -> &'static VariantDescriptor {
        self.descriptor
    }

    /// Configuration name of the variant.
    pub fn variant(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn hyperparams(&self) -> &HyperparameterSet {
        &self.hyperparams
    }

    /// Checks that every required hyperparameter is non-zero.
    pub fn validate(&self) -> Result<()> {
        match self
            .descriptor
            .required()
            .find(|&key| self.hyperparams.get(key) == 0)
        {
            Some(key) => Err(TwpipeError::InvalidHyperparameter {
                stage: self.stage(),
                variant: self.variant(),
                field: key.field_name(),
            }),
            None => Ok(()),
        }
    }

    /// Allocates a fresh, untrained network for the variant in `params`.
    pub fn build(&self, params: &mut ParameterCollection) -> Result<Network> {
        self.validate()?;
        self.construct(REGISTRY, params)
    }

    fn construct(
        &self,
        table: &[Registration],
        params: &mut ParameterCollection,
    ) -> Result<Network> {
        let topology = topology(table, self.stage(), self.descriptor.tag)?;
        let network = topology.build(params, self.descriptor.tag.cell(), &self.hyperparams)?;
        info!(
            stage = %self.stage(),
            variant = self.variant(),
            parameters = params.num_parameters()?,
            "[builder] network built"
        );
        Ok(network)
    }

    /// Checks that the recorded dimensions describe exactly the scalars
    /// `blob` holds, before anything is allocated for them.
    fn check_parameter_count(&self, table: &[Registration], blob: &[u8]) -> Result<()> {
        let namespace = self.stage().namespace();
        let topology = topology(table, self.stage(), self.descriptor.tag)?;
        let expected = topology
            .parameter_count(self.descriptor.tag.cell(), &self.hyperparams)
            .ok_or_else(|| TwpipeError::corrupt(namespace, "recorded dimensions overflow"))?;
        let actual = engine::blob_parameter_count(namespace, blob)?;
        if expected != actual {
            return Err(TwpipeError::corrupt(
                namespace,
                format!("recorded dimensions imply {expected} parameters, blob holds {actual}"),
            ));
        }
        Ok(())
    }

    /// Records the variant name and every hyperparameter the variant uses
    /// under the stage namespace, in artifact order.
    pub fn serialize(&self, store: &mut ModelStore) -> Result<()> {
        let namespace = self.stage().namespace();
        store.put(namespace, NAME_FIELD, self.variant())?;
        for key in self.descriptor.fields() {
            store.put(namespace, key.field_name(), encode_scalar(self.hyperparams.get(key)))?;
        }
        debug!(
            stage = %self.stage(),
            variant = self.variant(),
            "[builder] hyperparameters recorded"
        );
        Ok(())
    }

    /// Appends the (trained) parameters of the stage network to `store`.
    pub fn save_parameters(
        &self,
        params: &ParameterCollection,
        store: &mut ModelStore,
    ) -> Result<()> {
        store.put_parameters(self.stage().namespace(), params.save_parameters()?)
    }

    /// Rebuilds the stage network recorded in `store` and loads its trained
    /// parameters into `params`.
    ///
    /// Vocabulary sizes `vocab` reports as non-zero must equal the recorded
    /// ones; zero sizes adopt the recorded value.
    pub fn reconstruct(
        stage: Stage,
        vocab: &dyn VocabularyProvider,
        store: &ModelStore,
        params: &mut ParameterCollection,
    ) -> Result<(Self, Network)> {
        let builder = Self::read(stage, vocab, store)?;
        builder.validate()?;

        let blob = store.parameters(stage.namespace()).ok_or_else(|| {
            TwpipeError::corrupt(stage.namespace(), "no trained parameters recorded")
        })?;
        builder.check_parameter_count(REGISTRY, blob)?;

        let network = builder.construct(REGISTRY, params)?;
        params.load_parameters(stage.namespace(), blob)?;
        info!(stage = %stage, variant = builder.variant(), "[builder] network reconstructed");
        Ok((builder, network))
    }

    /// Reads the recorded variant and hyperparameters of `stage`.
    fn read(stage: Stage, vocab: &dyn VocabularyProvider, store: &ModelStore) -> Result<Self> {
        let namespace = stage.namespace();
        if !store.contains(namespace) {
            return Err(TwpipeError::StageNotRecorded { stage });
        }

        let mut reader = store.reader(namespace);
        let descriptor = catalog::lookup(stage, reader.expect(NAME_FIELD)?)?;

        let mut hyperparams = HyperparameterSet::new();
        for key in descriptor.fields() {
            let field = key.field_name();
            let recorded = decode_scalar(namespace, field, reader.expect(field)?)?;
            if let Some(category) = key.vocab_category() {
                let expected = vocab.size_of(category);
                if expected != 0 && expected != recorded {
                    return Err(TwpipeError::VocabularyMismatch {
                        stage,
                        field,
                        expected,
                        recorded,
                    });
                }
            }
            hyperparams.set(key, recorded);
        }
        reader.finish()?;

        Ok(Self {
            descriptor,
            hyperparams,
        })
    }
}
