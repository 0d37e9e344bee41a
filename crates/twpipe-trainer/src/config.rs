//! Command-line stage options.
//!
//! Each stage gets a variant option (`--tok-model`, `--pos-model`,
//! `--parse-model`) plus one option per hyperparameter it can use, prefixed
//! the same way. Unset dimensions are zero.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use twpipe_core::{Hyperparam, PipelineConfig, Stage, StageConfig};

/// Tokenizer options.
#[derive(Debug, Clone, Default, Args)]
pub struct TokenizerArgs {
    /// Tokenizer variant (linear-gru, linear-lstm, segmental-gru, segmental-lstm)
    #[arg(long)]
    pub tok_model: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub tok_char_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub tok_char_hidden_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub tok_char_n_layers: u32,
    /// Segment representation width (segmental variants)
    #[arg(long, default_value_t = 0)]
    pub tok_seg_dim: u32,
    /// Segment duration embedding width (segmental variants)
    #[arg(long, default_value_t = 0)]
    pub tok_dur_dim: u32,
}

impl TokenizerArgs {
    pub fn stage_config(&self) -> Option<StageConfig> {
        let variant = self.tok_model.as_ref()?;
        Some(
            StageConfig::new(variant)
                .with(Hyperparam::CharDim, self.tok_char_dim)
                .with(Hyperparam::CharHiddenDim, self.tok_char_hidden_dim)
                .with(Hyperparam::CharNLayers, self.tok_char_n_layers)
                .with(Hyperparam::SegDim, self.tok_seg_dim)
                .with(Hyperparam::DurDim, self.tok_dur_dim),
        )
    }
}

/// Postagger options.
#[derive(Debug, Clone, Default, Args)]
pub struct PostaggerArgs {
    /// Postagger variant (char-gru, char-lstm, char-gru-crf, char-lstm-crf,
    /// char-gru-wcluster, char-lstm-wcluster)
    #[arg(long)]
    pub pos_model: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub pos_char_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub pos_char_hidden_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub pos_char_n_layers: u32,
    #[arg(long, default_value_t = 0)]
    pub pos_word_hidden_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub pos_word_n_layers: u32,
    #[arg(long, default_value_t = 0)]
    pub pos_tag_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub pos_cluster_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub pos_cluster_hidden_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub pos_cluster_n_layers: u32,
    /// Width of pretrained word vectors; taken from `--embedding` when unset
    #[arg(long, default_value_t = 0)]
    pub pos_embedding_dim: u32,
}

impl PostaggerArgs {
    pub fn stage_config(&self) -> Option<StageConfig> {
        let variant = self.pos_model.as_ref()?;
        Some(
            StageConfig::new(variant)
                .with(Hyperparam::CharDim, self.pos_char_dim)
                .with(Hyperparam::CharHiddenDim, self.pos_char_hidden_dim)
                .with(Hyperparam::CharNLayers, self.pos_char_n_layers)
                .with(Hyperparam::WordHiddenDim, self.pos_word_hidden_dim)
                .with(Hyperparam::WordNLayers, self.pos_word_n_layers)
                .with(Hyperparam::TagDim, self.pos_tag_dim)
                .with(Hyperparam::ClusterDim, self.pos_cluster_dim)
                .with(Hyperparam::ClusterHiddenDim, self.pos_cluster_hidden_dim)
                .with(Hyperparam::ClusterNLayers, self.pos_cluster_n_layers)
                .with(Hyperparam::EmbeddingDim, self.pos_embedding_dim),
        )
    }
}

/// Parser options.
#[derive(Debug, Clone, Default, Args)]
pub struct ParserArgs {
    /// Parser variant (arcstd-gru, arcstd-lstm, arceager-gru, arceager-lstm)
    #[arg(long)]
    pub parse_model: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub parse_word_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub parse_tag_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub parse_word_hidden_dim: u32,
    #[arg(long, default_value_t = 0)]
    pub parse_word_n_layers: u32,
}

impl ParserArgs {
    pub fn stage_config(&self) -> Option<StageConfig> {
        let variant = self.parse_model.as_ref()?;
        Some(
            StageConfig::new(variant)
                .with(Hyperparam::WordDim, self.parse_word_dim)
                .with(Hyperparam::TagDim, self.parse_tag_dim)
                .with(Hyperparam::WordHiddenDim, self.parse_word_hidden_dim)
                .with(Hyperparam::WordNLayers, self.parse_word_n_layers),
        )
    }
}

/// Stage options of every stage.
#[derive(Debug, Clone, Default, Args)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub tokenizer: TokenizerArgs,
    #[command(flatten)]
    pub postagger: PostaggerArgs,
    #[command(flatten)]
    pub parser: ParserArgs,
}

impl PipelineArgs {
    /// Stage configurations given on the command line.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new();
        for stage in Stage::ALL {
            if let Some(stage_config) = self.stage_config(stage) {
                config = config.with_stage(stage, stage_config);
            }
        }
        config
    }

    fn stage_config(&self, stage: Stage) -> Option<StageConfig> {
        match stage {
            Stage::Tokenizer => self.tokenizer.stage_config(),
            Stage::Postagger => self.postagger.stage_config(),
            Stage::Parser => self.parser.stage_config(),
        }
    }
}

/// Reads `file` if given, then lets every stage configured on the command
/// line replace the file's configuration of that stage.
pub fn resolve_pipeline(file: Option<&Path>, args: &PipelineArgs) -> Result<PipelineConfig> {
    let mut config = match file {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => PipelineConfig::new(),
    };
    for (stage, stage_config) in args.pipeline_config().stages() {
        config = config.with_stage(stage, stage_config.clone());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        pipeline: PipelineArgs,
    }

    fn parse(args: &[&str]) -> PipelineArgs {
        Cli::parse_from(std::iter::once("twpipe").chain(args.iter().copied())).pipeline
    }

    #[test]
    fn stage_options_have_distinct_ids() {
        Cli::command().debug_assert();
    }

    #[test]
    fn same_dimension_differs_per_stage() {
        let args = parse(&[
            "--tok-model",
            "linear-gru",
            "--tok-char-dim",
            "8",
            "--pos-model",
            "char-gru",
            "--pos-char-dim",
            "16",
            "--pos-tag-dim",
            "4",
            "--parse-model",
            "arceager-lstm",
            "--parse-tag-dim",
            "12",
        ]);
        let config = args.pipeline_config();
        let dim = |stage, key| config.stage(stage).unwrap().hyperparams.get(key);
        assert_eq!(dim(Stage::Tokenizer, Hyperparam::CharDim), 8);
        assert_eq!(dim(Stage::Postagger, Hyperparam::CharDim), 16);
        assert_eq!(dim(Stage::Postagger, Hyperparam::TagDim), 4);
        assert_eq!(dim(Stage::Parser, Hyperparam::TagDim), 12);
    }

    #[test]
    fn unset_stages_are_not_configured() {
        let config = parse(&[]).pipeline_config();
        assert_eq!(config, PipelineConfig::new());
    }

    #[test]
    fn stage_flags_map_to_hyperparameters() {
        let args = parse(&[
            "--pos-model",
            "char-lstm-crf",
            "--pos-char-dim",
            "16",
            "--pos-word-n-layers",
            "1",
            "--parse-model",
            "arcstd-gru",
            "--parse-word-dim",
            "100",
        ]);
        let config = args.pipeline_config();

        let postagger = config.stage(Stage::Postagger).unwrap();
        assert_eq!(postagger.variant, "char-lstm-crf");
        assert_eq!(postagger.hyperparams.get(Hyperparam::CharDim), 16);
        assert_eq!(postagger.hyperparams.get(Hyperparam::WordNLayers), 1);
        assert_eq!(postagger.hyperparams.get(Hyperparam::TagDim), 0);

        let parser = config.stage(Stage::Parser).unwrap();
        assert_eq!(parser.hyperparams.get(Hyperparam::WordDim), 100);
        assert!(config.stage(Stage::Tokenizer).is_none());
    }

    #[test]
    fn command_line_overrides_file() {
        let path = std::env::temp_dir().join(format!("twpipe-{}-config.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{
                "tokenizer": { "variant": "linear-gru", "hyperparams": { "char-dim": 8 } },
                "postagger": { "variant": "char-gru", "hyperparams": { "char-dim": 8 } }
            }"#,
        )
        .unwrap();

        let args = parse(&["--pos-model", "char-lstm", "--pos-char-dim", "32"]);
        let config = resolve_pipeline(Some(&path), &args).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.stage(Stage::Tokenizer).unwrap().variant, "linear-gru");
        let postagger = config.stage(Stage::Postagger).unwrap();
        assert_eq!(postagger.variant, "char-lstm");
        assert_eq!(postagger.hyperparams.get(Hyperparam::CharDim), 32);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let path = Path::new("/nonexistent/twpipe.json");
        let err = resolve_pipeline(Some(path), &PipelineArgs::default()).unwrap_err();
        assert!(err.to_string().contains("reading configuration"));
    }
}
