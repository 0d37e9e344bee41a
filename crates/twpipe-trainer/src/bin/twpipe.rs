//! twpipe command line.
//!
//! `init` scans a corpus, builds every configured stage and writes the
//! artifact; `inspect` prints what an artifact records; `check` rebuilds the
//! requested stages from an artifact and prints their layer shapes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use twpipe_core::{AlphabetCollection, Hyperparam, ModelStore, Stage, VocabularySizes};
use twpipe_trainer::{
    InitialWeights, LoadRequest, PipelineArgs, init_artifact, load_clusters, load_conllu,
    load_embedding_dim, load_pipeline, resolve_pipeline,
};

#[derive(Parser)]
#[command(name = "twpipe")]
#[command(about = "Build, inspect and reload twpipe model artifacts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Details logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every configured stage and write a new artifact
    Init {
        /// Training corpus in CoNLL-U format
        #[arg(long)]
        train: PathBuf,
        /// Brown word clusters
        #[arg(long)]
        clusters: Option<PathBuf>,
        /// Pretrained word vectors in word2vec text format
        #[arg(long)]
        embedding: Option<PathBuf>,
        /// Artifact to write
        #[arg(long)]
        model: PathBuf,
        /// JSON stage configuration; stage options on the command line win
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        stages: PipelineArgs,
    },
    /// Print the fields and parameter sizes recorded in an artifact
    Inspect {
        #[arg(long)]
        model: PathBuf,
    },
    /// Rebuild stages from an artifact and print their layers
    Check {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        tokenize: bool,
        /// Implies --tokenize
        #[arg(long)]
        postag: bool,
        /// Implies --postag
        #[arg(long)]
        parse: bool,
        /// Expected character vocabulary size (0 = recorded alphabet)
        #[arg(long, default_value_t = 0)]
        chars: u32,
        #[arg(long, default_value_t = 0)]
        words: u32,
        #[arg(long, default_value_t = 0)]
        tags: u32,
        #[arg(long, default_value_t = 0)]
        clusters: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    match cli.command {
        Commands::Init {
            train,
            clusters,
            embedding,
            model,
            config,
            stages,
        } => init(
            &train,
            clusters.as_deref(),
            embedding.as_deref(),
            &model,
            config.as_deref(),
            &stages,
        ),
        Commands::Inspect { model } => inspect(&model),
        Commands::Check {
            model,
            tokenize,
            postag,
            parse,
            chars,
            words,
            tags,
            clusters,
        } => {
            let request = LoadRequest {
                tokenize,
                postag,
                parse,
            };
            let overrides = VocabularySizes {
                characters: chars,
                words,
                tags,
                clusters,
            };
            check(&model, request, overrides)
        }
    }
}

fn init(
    train: &Path,
    clusters: Option<&Path>,
    embedding: Option<&Path>,
    model: &Path,
    config: Option<&Path>,
    stages: &PipelineArgs,
) -> Result<()> {
    let mut config = resolve_pipeline(config, stages)?;

    let mut alphabets = AlphabetCollection::new();
    load_conllu(train, &mut alphabets)?;
    if let Some(path) = clusters {
        load_clusters(path, &mut alphabets)?;
    }

    if let Some(path) = embedding {
        let dim = load_embedding_dim(path)?;
        if let Some(postagger) = config.postagger.as_mut() {
            if postagger.hyperparams.get(Hyperparam::EmbeddingDim) == 0 {
                postagger.hyperparams.set(Hyperparam::EmbeddingDim, dim);
            }
        }
    }

    init_artifact(model, &config, &alphabets, &mut InitialWeights)?;
    info!(path = %model.display(), "[twpipe] model initialized");
    Ok(())
}

fn inspect(model: &Path) -> Result<()> {
    let store = ModelStore::load(model).with_context(|| format!("loading {}", model.display()))?;
    for namespace in store.namespaces() {
        println!("[{namespace}]");
        for (field, value) in store.fields(namespace) {
            if value.len() > 60 {
                let head: String = value.chars().take(60).collect();
                println!("  {field} = {head}... ({} bytes)", value.len());
            } else {
                println!("  {field} = {value}");
            }
        }
        if let Some(blob) = store.parameters(namespace) {
            println!("  <parameters> {} bytes", blob.len());
        }
    }
    Ok(())
}

fn check(model: &Path, request: LoadRequest, overrides: VocabularySizes) -> Result<()> {
    let pipeline = load_pipeline(model, request, overrides)?;
    for stage in Stage::ALL {
        let Some(loaded) = pipeline.stage(stage) else {
            continue;
        };
        println!(
            "[{stage}] {} ({} parameters)",
            loaded.builder.variant(),
            loaded.params.num_parameters()?
        );
        for (name, shape) in loaded.params.shapes()? {
            println!("  {name}: {shape:?}");
        }
    }
    Ok(())
}
