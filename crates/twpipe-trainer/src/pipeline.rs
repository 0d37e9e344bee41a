//! Training and loading drivers.
//!
//! [`init_artifact`] runs the training path for every configured stage and
//! writes one artifact; [`load_pipeline`] runs the inference path for the
//! requested stages of an existing artifact.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use twpipe_core::{
    ALPHABET_NAMESPACE, AlphabetCollection, ModelBuilder, ModelStore, Network, ParameterCollection,
    PipelineConfig, Stage, VocabCategory, VocabularyProvider, VocabularySizes,
};

/// The training loop seam. Implementations update `params` in place; the
/// driver records whatever they hold afterwards.
pub trait StageTrainer {
    fn train(
        &mut self,
        stage: Stage,
        network: &Network,
        params: &mut ParameterCollection,
    ) -> Result<()>;
}

/// Records the freshly initialised weights without any training.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitialWeights;

impl StageTrainer for InitialWeights {
    fn train(
        &mut self,
        stage: Stage,
        _network: &Network,
        params: &mut ParameterCollection,
    ) -> Result<()> {
        info!(
            stage = %stage,
            parameters = params.num_parameters()?,
            "[train] keeping initial weights"
        );
        Ok(())
    }
}

/// Builds, trains and records every stage of `config` into a new artifact
/// at `path`. The alphabets are recorded first.
pub fn init_artifact(
    path: &Path,
    config: &PipelineConfig,
    alphabets: &AlphabetCollection,
    trainer: &mut dyn StageTrainer,
) -> Result<ModelStore> {
    let mut store = ModelStore::create(path);
    alphabets.save(&mut store).context("recording alphabets")?;

    let mut trained = 0;
    for (stage, stage_config) in config.stages() {
        let builder = ModelBuilder::from_config(stage, stage_config, alphabets)
            .with_context(|| format!("configuring {stage}"))?;
        builder
            .serialize(&mut store)
            .with_context(|| format!("recording {stage} hyperparameters"))?;

        let mut params = ParameterCollection::cpu();
        let network = builder
            .build(&mut params)
            .with_context(|| format!("building {stage}"))?;
        trainer
            .train(stage, &network, &mut params)
            .with_context(|| format!("training {stage}"))?;
        builder
            .save_parameters(&params, &mut store)
            .with_context(|| format!("recording {stage} parameters"))?;
        trained += 1;
    }

    if trained == 0 {
        warn!("[train] no stage configured, artifact holds alphabets only");
    }
    store
        .flush()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(store)
}

/// Stages requested at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadRequest {
    pub tokenize: bool,
    pub postag: bool,
    pub parse: bool,
}

impl LoadRequest {
    /// Stages to load: tagging needs tokens and parsing needs tags.
    pub fn stages(&self) -> Vec<Stage> {
        let parser = self.parse;
        let postagger = self.postag || parser;
        let tokenizer = self.tokenize || postagger;
        [(Stage::Tokenizer, tokenizer), (Stage::Postagger, postagger), (Stage::Parser, parser)]
            .into_iter()
            .filter_map(|(stage, wanted)| wanted.then_some(stage))
            .collect()
    }
}

/// Expected vocabulary sizes at load time: explicit overrides take
/// precedence over the recorded alphabets.
#[derive(Debug, Clone)]
pub struct Expectations<'a> {
    pub alphabets: &'a AlphabetCollection,
    pub overrides: VocabularySizes,
}

impl VocabularyProvider for Expectations<'_> {
    fn size_of(&self, category: VocabCategory) -> u32 {
        match self.overrides.size_of(category) {
            0 => self.alphabets.size_of(category),
            size => size,
        }
    }
}

/// One reconstructed stage.
#[derive(Debug)]
pub struct LoadedStage {
    pub builder: ModelBuilder,
    pub params: ParameterCollection,
    pub network: Network,
}

/// The alphabets and reconstructed stages of an artifact.
#[derive(Debug)]
pub struct LoadedPipeline {
    pub alphabets: AlphabetCollection,
    pub stages: Vec<LoadedStage>,
}

impl LoadedPipeline {
    pub fn stage(&self, stage: Stage) -> Option<&LoadedStage> {
        self.stages.iter().find(|loaded| loaded.builder.stage() == stage)
    }
}

/// Loads the artifact at `path` and reconstructs the stages `request`
/// implies.
pub fn load_pipeline(
    path: &Path,
    request: LoadRequest,
    overrides: VocabularySizes,
) -> Result<LoadedPipeline> {
    let store = ModelStore::load(path).with_context(|| format!("loading {}", path.display()))?;

    let alphabets = if store.contains(ALPHABET_NAMESPACE) {
        AlphabetCollection::load(&store).context("loading alphabets")?
    } else {
        warn!("[load] artifact records no alphabets, adopting recorded vocabulary sizes");
        AlphabetCollection::new()
    };

    let expectations = Expectations {
        alphabets: &alphabets,
        overrides,
    };
    let mut stages = Vec::new();
    for stage in request.stages() {
        let mut params = ParameterCollection::cpu();
        let (builder, network) =
            ModelBuilder::reconstruct(stage, &expectations, &store, &mut params)
                .with_context(|| format!("reconstructing {stage}"))?;
        info!(stage = %stage, variant = builder.variant(), "[load] stage ready");
        stages.push(LoadedStage {
            builder,
            params,
            network,
        });
    }

    Ok(LoadedPipeline { alphabets, stages })
}
