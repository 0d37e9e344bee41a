//! # Pipeline Configuration
//!
//! Which variant each stage uses and with which hyperparameters. Stages left
//! out of a [`PipelineConfig`] are neither trained nor recorded.
//!
//! ```json
//! {
//!   "postagger": {
//!     "variant": "char-lstm-crf",
//!     "hyperparams": { "char-dim": 16, "char-hidden-dim": 32, "tag-dim": 8 }
//!   }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::Stage;
use crate::error::Result;
use crate::hyperparams::{Hyperparam, HyperparameterSet};

/// Configuration of a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Catalog name of the variant.
    pub variant: String,
    /// Configuration-supplied hyperparameters. Missing keys are zero.
    #[serde(default)]
    pub hyperparams: HyperparameterSet,
}

impl StageConfig {
    /// Create a configuration for `variant` with every hyperparameter at zero.
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            hyperparams: HyperparameterSet::new(),
        }
    }

    /// Set one hyperparameter.
    pub fn with(mut self, key: Hyperparam, value: u32) -> Self {
        self.hyperparams.set(key, value);
        self
    }
}

/// Configuration of every stage of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<StageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postagger: Option<StageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<StageConfig>,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Set the configuration of `stage`.
    pub fn with_stage(mut self, stage: Stage, config: StageConfig) -> Self {
        *self.slot(stage) = Some(config);
        self
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageConfig> {
        match stage {
            Stage::Tokenizer => self.tokenizer.as_ref(),
            Stage::Postagger => self.postagger.as_ref(),
            Stage::Parser => self.parser.as_ref(),
        }
    }

    fn slot(&mut self, stage: Stage) -> &mut Option<StageConfig> {
        match stage {
            Stage::Tokenizer => &mut self.tokenizer,
            Stage::Postagger => &mut self.postagger,
            Stage::Parser => &mut self.parser,
        }
    }

    /// Configured stages, in pipeline order.
    pub fn stages(&self) -> impl Iterator<Item = (Stage, &StageConfig)> {
        Stage::ALL
            .into_iter()
            .filter_map(|stage| self.stage(stage).map(|config| (stage, config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TwpipeError;

    #[test]
    fn stage_config_builder() {
        let config = StageConfig::new("char-gru")
            .with(Hyperparam::CharDim, 16)
            .with(Hyperparam::TagDim, 8);
        assert_eq!(config.variant, "char-gru");
        assert_eq!(config.hyperparams.get(Hyperparam::CharDim), 16);
        assert_eq!(config.hyperparams.get(Hyperparam::TagDim), 8);
        assert_eq!(config.hyperparams.get(Hyperparam::WordDim), 0);
    }

    #[test]
    fn parse_json() {
        let config = PipelineConfig::from_json(
            r#"{
                "tokenizer": { "variant": "linear-lstm" },
                "postagger": {
                    "variant": "char-lstm-crf",
                    "hyperparams": { "char-dim": 16, "word-n-layers": 1 }
                }
            }"#,
        )
        .unwrap();

        let tokenizer = config.stage(Stage::Tokenizer).unwrap();
        assert_eq!(tokenizer.variant, "linear-lstm");
        assert_eq!(tokenizer.hyperparams, HyperparameterSet::new());

        let postagger = config.stage(Stage::Postagger).unwrap();
        assert_eq!(postagger.hyperparams.get(Hyperparam::CharDim), 16);
        assert_eq!(postagger.hyperparams.get(Hyperparam::WordNLayers), 1);
        assert!(config.stage(Stage::Parser).is_none());

        let stages: Vec<_> = config.stages().map(|(stage, _)| stage).collect();
        assert_eq!(stages, [Stage::Tokenizer, Stage::Postagger]);
    }

    #[test]
    fn unknown_hyperparameter_is_rejected() {
        let err = PipelineConfig::from_json(
            r#"{ "parser": { "variant": "arcstd-gru", "hyperparams": { "beam-size": 8 } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, TwpipeError::Json(_)));
        assert!(err.to_string().contains("beam-size"));
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(PipelineConfig::from_json(r#"{ "lemmatizer": { "variant": "x" } }"#).is_err());
    }

    #[test]
    fn json_round_trip() {
        let config = PipelineConfig::new().with_stage(
            Stage::Parser,
            StageConfig::new("arceager-lstm").with(Hyperparam::WordDim, 32),
        );
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(PipelineConfig::from_json(&text).unwrap(), config);
    }
}
