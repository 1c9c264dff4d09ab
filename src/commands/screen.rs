use crate::config::Settings;
use crate::controller::state::Phase;
use crate::controller::ScreenController;
use crate::error::ClassifyError;
use crate::models::classify_types::ClassifyResult;
use crate::services::classifier::model_manager::ModelManager;
use crate::services::decoder::ImageDecoder;
use crate::services::picker::{PromptSource, QueueSource};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

const RELOAD_COMMAND: &str = ":reload";

/// What a line typed at the unavailable screen asks for.
#[derive(Debug, PartialEq, Eq)]
enum RetryCommand {
    Reload,
    Quit,
    Unknown,
}

impl RetryCommand {
    /// `None` is a closed prompt (`:q` or end of input).
    fn parse(line: Option<&str>) -> Self {
        match line.map(str::trim) {
            None => RetryCommand::Quit,
            Some(RELOAD_COMMAND) => RetryCommand::Reload,
            Some(_) => RetryCommand::Unknown,
        }
    }
}

/// Interactive screen: the terminal plays the image picker.
pub async fn interactive(settings: &Settings) -> anyhow::Result<ExitCode> {
    let source = Arc::new(PromptSource::stdin());
    let mut controller = ScreenController::new(
        Arc::new(ModelManager::new(settings)),
        source.clone(),
        Arc::new(ImageDecoder::new()),
    );

    controller.mount();
    println!("{}", controller.view());
    controller.settle().await;

    loop {
        println!("{}", controller.view());

        if controller.state().phase == Phase::Unavailable {
            println!("Type {} to retry loading, or :q to quit.", RELOAD_COMMAND);
            let line = source.read_line().await?;
            match RetryCommand::parse(line.as_deref()) {
                RetryCommand::Reload => {
                    controller.mount();
                    controller.settle().await;
                }
                RetryCommand::Quit => break,
                RetryCommand::Unknown => {}
            }
            continue;
        }

        println!("Image path or URL (empty to cancel, :q to quit):");
        controller.select_image();
        controller.settle().await;

        if source.is_closed() {
            break;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Outcome of a scripted run.
#[derive(Debug, Default)]
pub struct QueueReport {
    pub results: Vec<ClassifyResult>,
    pub failures: usize,
}

impl QueueReport {
    pub fn succeeded(&self) -> bool {
        self.failures == 0
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.succeeded() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

/// Runs the screen over a fixed list of inputs, one selection at a time.
pub async fn scripted(settings: &Settings, inputs: &[String], json: bool) -> anyhow::Result<ExitCode> {
    let source = Arc::new(QueueSource::from_inputs(inputs)?);
    let mut controller = ScreenController::new(
        Arc::new(ModelManager::new(settings)),
        source.clone(),
        Arc::new(ImageDecoder::new()),
    );

    let report = classify_queue(&mut controller, &source, json, &mut std::io::stdout()).await?;
    if !report.succeeded() {
        tracing::warn!(failures = report.failures, "some images could not be classified");
    }
    Ok(report.exit_code())
}

/// Mounts `controller`, then selects and classifies every queued image.
///
/// Writes one rendered view per image, or a single JSON array when `json`
/// is set. Fails if the engine or model never comes up.
pub async fn classify_queue<W: Write>(
    controller: &mut ScreenController,
    source: &QueueSource,
    json: bool,
    out: &mut W,
) -> anyhow::Result<QueueReport> {
    controller.mount();
    controller.settle().await;

    if controller.state().phase == Phase::Unavailable {
        let cause = controller
            .state()
            .last_error
            .clone()
            .unwrap_or_else(|| ClassifyError::ModelLoad("model unavailable".to_string()));
        return Err(anyhow::Error::new(cause).context("classification screen is unavailable"));
    }

    let mut report = QueueReport::default();

    while source.remaining() > 0 {
        controller.select_image();
        controller.settle().await;

        let state = controller.state();
        if state.phase == Phase::Failed {
            report.failures += 1;
        }

        report.results.push(ClassifyResult {
            image: state
                .current_image
                .as_ref()
                .map(|i| i.to_string())
                .unwrap_or_default(),
            predictions: state.predictions.clone(),
            error: state.last_error.clone(),
        });

        if !json {
            writeln!(out, "{}", controller.view())?;
        }
    }

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&report.results)?)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classify_types::{ImageRef, Prediction, Tensor};
    use crate::services::collaborators::{Decoder, InferenceEngine, Model};
    use async_trait::async_trait;
    use ndarray::Array3;

    struct StubEngine {
        fail: bool,
    }

    #[async_trait]
    impl InferenceEngine for StubEngine {
        async fn ready(&self) -> Result<(), ClassifyError> {
            if self.fail {
                return Err(ClassifyError::EngineInit("no runtime".into()));
            }
            Ok(())
        }

        async fn load_model(&self) -> Result<Arc<dyn Model>, ClassifyError> {
            Ok(Arc::new(StubModel))
        }
    }

    struct StubModel;

    #[async_trait]
    impl Model for StubModel {
        async fn classify(&self, _tensor: Tensor) -> Result<Vec<Prediction>, ClassifyError> {
            Ok(vec![Prediction {
                class_name: "tabby".into(),
                probability: 0.9,
            }])
        }
    }

    struct StubDecoder;

    #[async_trait]
    impl Decoder for StubDecoder {
        async fn fetch_bytes(&self, image: &ImageRef) -> Result<Vec<u8>, ClassifyError> {
            if image.uri().contains("missing") {
                return Err(ClassifyError::Fetch(format!("{} not found", image)));
            }
            Ok(vec![0; 3])
        }

        async fn decode(&self, bytes: Vec<u8>) -> Result<Tensor, ClassifyError> {
            Ok(Array3::from_shape_vec((1, 1, 3), bytes).unwrap())
        }
    }

    fn queue(fail_engine: bool, uris: &[&str]) -> (ScreenController, Arc<QueueSource>) {
        let source = Arc::new(QueueSource::new(uris.iter().map(|u| ImageRef::new(*u))));
        let controller = ScreenController::new(
            Arc::new(StubEngine { fail: fail_engine }),
            source.clone(),
            Arc::new(StubDecoder),
        );
        (controller, source)
    }

    #[tokio::test]
    async fn json_output_has_one_result_per_input_and_reports_failures() {
        let (mut controller, source) = queue(false, &["a.jpg", "missing.jpg", "b.jpg"]);
        let mut out = Vec::new();

        let report = classify_queue(&mut controller, &source, true, &mut out).await.unwrap();
        assert_eq!(report.failures, 1);
        assert!(!report.succeeded());

        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let results = json.as_array().unwrap();
        assert_eq!(results.len(), 3);

        assert_eq!(results[0]["image"], "a.jpg");
        assert_eq!(results[0]["predictions"][0]["class_name"], "tabby");
        assert!(results[0]["error"].is_null());

        assert_eq!(results[1]["image"], "missing.jpg");
        assert_eq!(results[1]["predictions"].as_array().unwrap().len(), 0);
        assert_eq!(results[1]["error"]["kind"], "fetch");

        assert_eq!(results[2]["image"], "b.jpg");
        assert!(results[2]["error"].is_null());
    }

    #[tokio::test]
    async fn text_output_renders_each_view() {
        let (mut controller, source) = queue(false, &["a.jpg", "b.jpg"]);
        let mut out = Vec::new();

        let report = classify_queue(&mut controller, &source, false, &mut out).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.results.len(), 2);

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("tabby").count(), 2);
        assert!(serde_json::from_str::<serde_json::Value>(&text).is_err());
    }

    #[tokio::test]
    async fn unavailable_engine_fails_the_run() {
        let (mut controller, source) = queue(true, &["a.jpg"]);
        let mut out = Vec::new();

        let err = classify_queue(&mut controller, &source, true, &mut out).await.unwrap_err();
        assert!(format!("{:#}", err).contains("no runtime"));
        assert!(out.is_empty());
        assert_eq!(source.remaining(), 1);
    }

    #[test]
    fn only_reload_remounts_unavailable_screen() {
        assert_eq!(RetryCommand::parse(Some(":reload")), RetryCommand::Reload);
        assert_eq!(RetryCommand::parse(Some("  :reload\n")), RetryCommand::Reload);
        assert_eq!(RetryCommand::parse(Some("")), RetryCommand::Unknown);
        assert_eq!(RetryCommand::parse(Some("cat.jpg")), RetryCommand::Unknown);
        assert_eq!(RetryCommand::parse(None), RetryCommand::Quit);
    }
}
