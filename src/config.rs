use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

/// Serve a pretrained sound classifier over HTTP.
#[derive(Debug, Clone, Parser, Serialize)]
#[command(name = "sound_classifier", version, about)]
pub struct ServerConfig {
    /// Address to bind.
    #[arg(long, env = "SOUND_CLASSIFIER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind.
    #[arg(long, env = "SOUND_CLASSIFIER_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Directory holding the model and its class map.
    #[arg(long, env = "SOUND_CLASSIFIER_MODEL_DIR", default_value = "yamnet_model")]
    pub model_dir: PathBuf,

    /// ONNX model file name inside the model directory.
    #[arg(long, default_value = "yamnet.onnx")]
    pub model_file: String,

    /// Class map CSV inside the model directory.
    #[arg(long, default_value = "yamnet_class_map.csv")]
    pub class_map: String,

    /// Largest accepted request body, in bytes.
    #[arg(long, env = "SOUND_CLASSIFIER_MAX_UPLOAD_BYTES", default_value_t = 25 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Intra-op threads for the ONNX session.
    #[arg(long, default_value_t = 1)]
    pub intra_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            model_dir: PathBuf::from("yamnet_model"),
            model_file: "yamnet.onnx".into(),
            class_map: "yamnet_class_map.csv".into(),
            max_upload_bytes: 25 * 1024 * 1024,
            intra_threads: 1,
        }
    }
}

impl ServerConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_file)
    }

    pub fn class_map_path(&self) -> PathBuf {
        self.model_dir.join(&self.class_map)
    }
}
