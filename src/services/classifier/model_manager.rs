use crate::config::Settings;
use crate::error::ClassifyError;
use crate::models::classify_types::ModelStatus;
use crate::services::classifier::inference::OrtModel;
use crate::services::collaborators::{InferenceEngine, Model};
use async_trait::async_trait;
use futures::StreamExt;
use ort::environment::Environment;
use ort::session::Session;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ModelType {
    #[serde(rename = "mobilenet_v2", alias = "mobilenet")]
    MobileNetV2,
    #[serde(rename = "convnext_base")]
    ConvNextBase,
    #[serde(rename = "convnext_large")]
    ConvNextLarge,
}

impl ModelType {
    /// (model url, config url, model file, config file)
    fn config(&self) -> (&'static str, &'static str, &'static str, &'static str) {
        match self {
            ModelType::MobileNetV2 => (
                "https://huggingface.co/Xenova/mobilenet_v2_1.0_224/resolve/main/onnx/model.onnx",
                "https://huggingface.co/Xenova/mobilenet_v2_1.0_224/resolve/main/config.json",
                "mobilenet_v2_1.0_224.onnx",
                "mobilenet_v2_1.0_224-config.json",
            ),
            ModelType::ConvNextBase => (
                "https://huggingface.co/Xenova/convnextv2-base-22k-384/resolve/main/onnx/model.onnx",
                "https://huggingface.co/Xenova/convnextv2-base-22k-384/resolve/main/config.json",
                "convnextv2-base-22k-384.onnx",
                "convnextv2-base-22k-384-config.json",
            ),
            ModelType::ConvNextLarge => (
                "https://huggingface.co/Xenova/convnextv2-large-22k-384/resolve/main/onnx/model.onnx",
                "https://huggingface.co/Xenova/convnextv2-large-22k-384/resolve/main/config.json",
                "convnextv2-large-22k-384.onnx",
                "convnextv2-large-22k-384-config.json",
            ),
        }
    }

    pub fn crop_size(&self) -> u32 {
        match self {
            ModelType::ConvNextBase | ModelType::ConvNextLarge => 384,
            ModelType::MobileNetV2 => 224,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::MobileNetV2 => "mobilenet_v2",
            ModelType::ConvNextBase => "convnext_base",
            ModelType::ConvNextLarge => "convnext_large",
        }
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "mobilenet_v2" | "mobilenet" => Ok(ModelType::MobileNetV2),
            "convnext_base" => Ok(ModelType::ConvNextBase),
            "convnext_large" => Ok(ModelType::ConvNextLarge),
            other => Err(format!("unknown model type {:?}", other)),
        }
    }
}

/// ONNX Runtime backed inference engine.
///
/// Owns the on-disk model files for one `ModelType` and hands out
/// `OrtModel`s from `load_model`.
#[derive(Clone, Debug)]
pub struct ModelManager {
    pub model_dir: PathBuf,
    pub model_type: ModelType,
    pub use_gpu: bool,
    pub top_k: usize,
    pub auto_download: bool,
    pub intra_threads: usize,
    /// ort only holds the environment weakly; sessions need it alive.
    environment: Arc<Mutex<Option<Arc<Environment>>>>,
}

impl ModelManager {
    pub fn new(settings: &Settings) -> Self {
        Self {
            model_dir: settings.model_dir.clone(),
            model_type: settings.model_type,
            use_gpu: settings.use_gpu,
            top_k: settings.top_k,
            auto_download: settings.auto_download,
            intra_threads: settings.intra_threads,
            environment: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_engine_ready(&self) -> bool {
        self.environment.lock().map(|env| env.is_some()).unwrap_or(false)
    }

    pub fn model_path(&self) -> PathBuf {
        let (_, _, filename, _) = self.model_type.config();
        self.model_dir.join(filename)
    }

    pub fn config_path(&self) -> PathBuf {
        let (_, _, _, filename) = self.model_type.config();
        self.model_dir.join(filename)
    }

    pub fn is_downloaded(&self) -> bool {
        self.model_path().exists() && self.config_path().exists()
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            model_type: self.model_type.as_str().to_string(),
            model_path: self.model_path().display().to_string(),
            config_path: self.config_path().display().to_string(),
            downloaded: self.is_downloaded(),
        }
    }

    pub async fn download_model(&self) -> Result<(), ClassifyError> {
        if self.is_downloaded() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.model_dir).await.map_err(|e| {
            ClassifyError::ModelLoad(format!("Failed to create model directory: {}", e))
        })?;

        let (model_url, config_url, _, _) = self.model_type.config();
        let client = reqwest::Client::new();

        let config_path = self.config_path();
        if !config_path.exists() {
            download_file(&client, config_url, &config_path).await?;
        }

        let model_path = self.model_path();
        if !model_path.exists() {
            download_file(&client, model_url, &model_path).await?;
        }

        Ok(())
    }

    async fn load_labels(&self) -> Result<Vec<String>, ClassifyError> {
        let config_path = self.config_path();
        let config_content = tokio::fs::read_to_string(&config_path).await.map_err(|e| {
            ClassifyError::ModelLoad(format!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            ))
        })?;
        parse_labels(&config_content)
    }

    fn build_session(&self) -> Result<Session, ClassifyError> {
        let mut builder = Session::builder()
            .map_err(|e| ClassifyError::ModelLoad(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| ClassifyError::ModelLoad(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(self.intra_threads)
            .map_err(|e| ClassifyError::ModelLoad(format!("Failed to set intra threads: {}", e)))?;

        if self.use_gpu {
            builder = builder.with_execution_providers([
                ort::ep::CoreML::default().build(),
                ort::ep::CUDA::default().build(),
                ort::ep::CPU::default().build(),
            ]).map_err(|e| ClassifyError::ModelLoad(format!("Failed to register GPU execution providers: {}", e)))?;
        } else {
            builder = builder.with_execution_providers([
                ort::ep::CPU::default().build(),
            ]).map_err(|e| ClassifyError::ModelLoad(format!("Failed to register CPU execution provider: {}", e)))?;
        }

        builder
            .commit_from_file(self.model_path())
            .map_err(|e| ClassifyError::ModelLoad(format!("Failed to load ONNX model: {}", e)))
    }
}

#[async_trait]
impl InferenceEngine for ModelManager {
    async fn ready(&self) -> Result<(), ClassifyError> {
        let environment = tokio::task::spawn_blocking(|| {
            if !ort::init().with_name("photo-predict").commit() {
                tracing::debug!("onnx runtime options already committed");
            }
            ort::environment::get_environment()
        })
        .await
        .map_err(|e| ClassifyError::EngineInit(format!("Failed to spawn runtime init: {}", e)))?
        .map_err(|e| {
            ClassifyError::EngineInit(format!("Failed to create ONNX Runtime environment: {}", e))
        })?;

        *self
            .environment
            .lock()
            .map_err(|_| ClassifyError::EngineInit("runtime environment lock poisoned".to_string()))? =
            Some(environment);
        tracing::debug!("onnx runtime environment initialized");
        Ok(())
    }

    async fn load_model(&self) -> Result<Arc<dyn Model>, ClassifyError> {
        if !self.is_downloaded() {
            if !self.auto_download {
                return Err(ClassifyError::ModelLoad(format!(
                    "Model files missing in {}; run `photo-predict download` first",
                    self.model_dir.display()
                )));
            }
            tracing::info!(model = self.model_type.as_str(), "downloading model files");
            self.download_model().await?;
        }

        let labels = self.load_labels().await?;
        tracing::debug!(count = labels.len(), "labels loaded");

        let manager = self.clone();
        let session = tokio::task::spawn_blocking(move || manager.build_session())
            .await
            .map_err(|e| {
                ClassifyError::ModelLoad(format!("Failed to spawn model loading task: {}", e))
            })??;

        tracing::info!(
            model = self.model_type.as_str(),
            gpu = self.use_gpu,
            "model session ready"
        );

        let model: Arc<dyn Model> = Arc::new(OrtModel::new(
            session,
            labels,
            self.top_k,
            self.model_type.crop_size(),
        ));
        Ok(model)
    }
}

/// Labels from a model `config.json`'s `id2label` map, ordered by id.
pub fn parse_labels(config_content: &str) -> Result<Vec<String>, ClassifyError> {
    let config: serde_json::Value = serde_json::from_str(config_content)
        .map_err(|e| ClassifyError::ModelLoad(format!("Failed to parse config JSON: {}", e)))?;

    let id2label = config["id2label"]
        .as_object()
        .ok_or_else(|| ClassifyError::ModelLoad("Config missing id2label field".to_string()))?;

    let mut labels: Vec<(usize, String)> = id2label
        .iter()
        .map(|(k, v)| {
            let idx = k.parse::<usize>().map_err(|_| {
                ClassifyError::ModelLoad(format!("id2label key {:?} is not an index", k))
            })?;
            let label = v.as_str().unwrap_or("unknown").to_string();
            Ok((idx, label))
        })
        .collect::<Result<_, ClassifyError>>()?;
    labels.sort_by_key(|(idx, _)| *idx);

    Ok(labels.into_iter().map(|(_, label)| label).collect())
}

async fn download_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<(), ClassifyError> {
    let part = dest.with_extension("part");
    let result = stream_to_file(client, url, &part).await;

    match result {
        Ok(()) => tokio::fs::rename(&part, dest).await.map_err(|e| {
            ClassifyError::ModelLoad(format!("Failed to move {} into place: {}", dest.display(), e))
        }),
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}

async fn stream_to_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<(), ClassifyError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ClassifyError::ModelLoad(format!("Failed to download {}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(ClassifyError::ModelLoad(format!(
            "Failed to download {}: HTTP {}",
            url,
            response.status()
        )));
    }

    let total_size = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
        ClassifyError::ModelLoad(format!("Failed to create file {}: {}", dest.display(), e))
    })?;

    let mut stream = response.bytes_stream();
    let mut last_logged = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ClassifyError::ModelLoad(format!("Download interrupted: {}", e)))?;
        downloaded += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .map_err(|e| ClassifyError::ModelLoad(format!("Failed to write to file: {}", e)))?;

        if total_size > 0 {
            let progress = (downloaded * 100) / total_size;
            if progress >= last_logged + 10 {
                tracing::info!(url, progress, "download progress");
                last_logged = progress;
            }
        }
    }

    file.flush()
        .await
        .map_err(|e| ClassifyError::ModelLoad(format!("Failed to write to file: {}", e)))?;
    tracing::info!(url, bytes = downloaded, "download complete");

    Ok(())
}
