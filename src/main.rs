use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;
use sound_classifier::{server, LabelTable, OnnxClassifier, Result, ServerConfig, SoundClassifier};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = ServerConfig::parse();
    info!("Starting with config: {}", serde_json::to_string(&config)?);

    let classifier = load_classifier(&config).await?;
    server::serve(&config, classifier).await
}

/// Model and labels load once, before the listener is bound.
async fn load_classifier(config: &ServerConfig) -> Result<Arc<SoundClassifier>> {
    let model_path = config.model_path();
    let class_map_path = config.class_map_path();
    let intra_threads = config.intra_threads;

    info!("Loading labels from {}", class_map_path.display());
    info!("Using model: {}", model_path.display());

    let classifier = tokio::task::spawn_blocking(move || {
        let labels = LabelTable::from_csv_path(&class_map_path)?;
        info!("Loaded {} class names", labels.len());
        let model = OnnxClassifier::load(&model_path, intra_threads)?;
        SoundClassifier::with_default_audio(Box::new(model), labels)
    })
    .await
    .context("startup task panicked")?
    .context("failed to initialise classifier")?;

    Ok(Arc::new(classifier))
}
