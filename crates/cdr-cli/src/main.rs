//! CDR CLI - Command-line interface
//!
//! Usage:
//!   cdr preprocess
//!   cdr train [--epochs N] [--beam-size N]
//!   cdr evaluate
//!   cdr decode --text <text>

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use cdr_core::{AnnotatedDocument, AppConfig, InstanceStore, JointAnnotation, LoggingConfig};
use cdr_extractor::{
    AggregateMetrics, Evaluator, FeatureSet, GoldBuilder, MeshDictionary, ModelFile, TextPreparer,
    Trainer, TrainingInstance,
};

#[derive(Parser)]
#[command(name = "cdr")]
#[command(about = "Joint chemical/disease and CID relation extraction")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split, tokenize and store gold annotations for every document
    Preprocess {
        /// Annotated documents (JSON array)
        #[arg(long)]
        documents: Option<PathBuf>,
        /// Output directory (cleared first)
        #[arg(long)]
        instance_dir: Option<PathBuf>,
    },
    /// Train a model on preprocessed instances
    Train {
        #[arg(long)]
        instance_dir: Option<PathBuf>,
        /// Where to write the model
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        beam_size: Option<usize>,
    },
    /// Decode preprocessed documents and report precision/recall/F1
    Evaluate {
        #[arg(long)]
        documents: Option<PathBuf>,
        #[arg(long)]
        instance_dir: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Decode free text and print the annotations as JSON
    Decode {
        /// Text to decode
        #[arg(long, conflicts_with = "input")]
        text: Option<String>,
        /// File holding the text to decode
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("cdr={}", logging.level).into());
    if logging.json_format {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    Ok(config.with_env_override()?)
}

/// Identifier dictionary from the configured TSV, or from gold annotations
fn load_resolver(config: &AppConfig) -> anyhow::Result<MeshDictionary> {
    let dictionary = match &config.data.dictionary {
        Some(path) => MeshDictionary::from_tsv(path)?,
        None => MeshDictionary::from_documents(&load_documents(config)?),
    };
    tracing::info!("Identifier dictionary holds {} entries", dictionary.len());
    Ok(dictionary)
}

fn load_documents(config: &AppConfig) -> anyhow::Result<Vec<AnnotatedDocument>> {
    let path = &config.data.documents;
    AnnotatedDocument::load_all(path)
        .with_context(|| format!("loading documents from {}", path.display()))
}

#[derive(Serialize)]
struct DecodedSentence {
    offset: usize,
    annotation: JointAnnotation,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config)?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Preprocess {
            documents,
            instance_dir,
        } => {
            if let Some(path) = documents {
                config.data.documents = path;
            }
            if let Some(dir) = instance_dir {
                config.data.instance_dir = dir;
            }
            config.validate()?;

            let documents = load_documents(&config)?;
            let preparer = TextPreparer::from_config(&config.data)?;
            let gold = GoldBuilder::from_config(&config.perceptron)?;
            let store = InstanceStore::create(&config.data.instance_dir)?;

            let mut sentences = 0;
            for document in &documents {
                let records = gold.records(document, preparer.prepare_document(document));
                sentences += records.len();
                store.write_document(&document.id, &records)?;
            }
            tracing::info!(
                "Preprocessed {} documents ({} sentences) into {}",
                documents.len(),
                sentences,
                config.data.instance_dir.display()
            );
        }
        Commands::Train {
            instance_dir,
            model,
            epochs,
            beam_size,
        } => {
            if let Some(dir) = instance_dir {
                config.data.instance_dir = dir;
            }
            if let Some(path) = model {
                config.data.model_path = path;
            }
            if let Some(epochs) = epochs {
                config.perceptron.epochs = epochs;
            }
            if let Some(beam_size) = beam_size {
                config.perceptron.beam_size = beam_size;
            }
            config.validate()?;

            let resolver = load_resolver(&config)?;
            let store = InstanceStore::open(&config.data.instance_dir)?;
            let mut instances = Vec::new();
            for id in store.document_ids()? {
                for record in store.read_document(&id)? {
                    match record.gold {
                        Some(gold) => instances.push(TrainingInstance::new(record.sentence, gold)?),
                        None => tracing::warn!("Sentence without gold output in document {}", id),
                    }
                }
            }
            tracing::info!("Training on {} sentences", instances.len());

            let trainer = Trainer::new(config.perceptron.clone(), FeatureSet::default(), &resolver)?;
            let trained = trainer.train(&instances)?;
            ModelFile::new(config.perceptron.clone(), trained).save(&config.data.model_path)?;
        }
        Commands::Evaluate {
            documents,
            instance_dir,
            model,
        } => {
            if let Some(path) = documents {
                config.data.documents = path;
            }
            if let Some(dir) = instance_dir {
                config.data.instance_dir = dir;
            }
            if let Some(path) = model {
                config.data.model_path = path;
            }
            config.validate()?;

            let model = ModelFile::load(&config.data.model_path)?;
            let resolver = load_resolver(&config)?;
            let decoder = model.decoder(&resolver)?;
            let evaluator = Evaluator::new(&resolver);
            let store = InstanceStore::open(&config.data.instance_dir)?;

            let mut aggregate = AggregateMetrics::default();
            for document in load_documents(&config)? {
                let records = match store.read_document(&document.id) {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::warn!("Skipping document {}: {}", document.id, e);
                        continue;
                    }
                };
                let sentences: Vec<_> = records.into_iter().map(|r| r.sentence).collect();
                let predictions: Vec<JointAnnotation> = decoder
                    .decode_all(&sentences)?
                    .into_iter()
                    .map(Into::into)
                    .collect();
                aggregate.add(&evaluator.evaluate_document(&document, &predictions));
            }
            println!("{}", aggregate.report());
        }
        Commands::Decode { text, input, model } => {
            if let Some(path) = model {
                config.data.model_path = path;
            }
            let text = match (text, input) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => anyhow::bail!("either --text or --input is required"),
            };

            let model = ModelFile::load(&config.data.model_path)?;
            let resolver = load_resolver(&config)?;
            let decoder = model.decoder(&resolver)?;
            let sentences = TextPreparer::from_config(&config.data)?.prepare(&text);

            let decoded: Vec<DecodedSentence> = decoder
                .decode_all(&sentences)?
                .into_iter()
                .zip(&sentences)
                .map(|(hypothesis, sentence)| DecodedSentence {
                    offset: sentence.offset,
                    annotation: hypothesis.into(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&decoded)?);
        }
    }

    Ok(())
}
