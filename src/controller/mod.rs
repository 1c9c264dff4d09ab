//! The classification screen controller.
//!
//! All screen state lives in one `ScreenState` owned by the controller and is
//! changed only through `ScreenState::apply`. Collaborator calls run as
//! futures in a single `FuturesUnordered` set that the controller polls from
//! one task, so completions are applied one at a time.

pub mod state;
pub mod view;

use crate::error::ClassifyError;
use crate::models::classify_types::{ImageRef, PickOutcome, Prediction};
use crate::services::collaborators::{Decoder, ImageSource, InferenceEngine, Model};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use state::{Effect, Event, Generation, ScreenState};
use std::sync::Arc;
use view::ScreenView;

enum Completion {
    Engine(Result<(), ClassifyError>),
    Model(Result<Arc<dyn Model>, ClassifyError>),
    Pick(Result<PickOutcome, ClassifyError>),
    Classify {
        generation: Generation,
        result: Result<Vec<Prediction>, ClassifyError>,
    },
}

pub struct ScreenController {
    engine: Arc<dyn InferenceEngine>,
    source: Arc<dyn ImageSource>,
    decoder: Arc<dyn Decoder>,
    model: Option<Arc<dyn Model>>,
    state: ScreenState,
    pending: FuturesUnordered<BoxFuture<'static, Completion>>,
    picking: bool,
}

impl ScreenController {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        source: Arc<dyn ImageSource>,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        Self {
            engine,
            source,
            decoder,
            model: None,
            state: ScreenState::new(),
            pending: FuturesUnordered::new(),
            picking: false,
        }
    }

    pub fn state(&self) -> &ScreenState {
        &self.state
    }

    pub fn view(&self) -> ScreenView {
        ScreenView::from_state(&self.state)
    }

    /// Starts engine initialization. Also re-mounts an `Unavailable` screen.
    pub fn mount(&mut self) {
        if self.state.phase == state::Phase::Unavailable {
            self.model = None;
        }
        self.apply(Event::Mounted);
    }

    /// Opens the image source. Returns `false` when selection is not
    /// currently offered (model not ready, or a pick already outstanding).
    pub fn select_image(&mut self) -> bool {
        if !self.state.can_select() || self.picking {
            tracing::debug!(
                phase = ?self.state.phase,
                picking = self.picking,
                "image selection unavailable"
            );
            return false;
        }

        self.picking = true;
        let source = self.source.clone();
        self.pending
            .push(async move { Completion::Pick(source.pick_image().await) }.boxed());
        true
    }

    /// Waits for the next collaborator call to finish and applies it.
    /// Returns `false` when nothing is in flight.
    pub async fn step(&mut self) -> bool {
        match self.pending.next().await {
            Some(completion) => {
                self.complete(completion);
                true
            }
            None => false,
        }
    }

    /// Drives every in-flight call, including any they trigger, to completion.
    pub async fn settle(&mut self) {
        while self.step().await {}
    }

    fn complete(&mut self, completion: Completion) {
        let event = match completion {
            Completion::Engine(Ok(())) => {
                tracing::info!("inference engine ready");
                Event::EngineReady
            }
            Completion::Engine(Err(error)) => {
                tracing::error!(%error, "inference engine failed to initialize");
                Event::EngineFailed(error)
            }
            Completion::Model(Ok(model)) => {
                tracing::info!("model loaded");
                self.model = Some(model);
                Event::ModelLoaded
            }
            Completion::Model(Err(error)) => {
                tracing::error!(%error, "model failed to load");
                Event::ModelFailed(error)
            }
            Completion::Pick(result) => {
                self.picking = false;
                match result {
                    Ok(PickOutcome::Selected(image)) => {
                        tracing::info!(%image, "image selected");
                        Event::ImagePicked(image)
                    }
                    Ok(PickOutcome::Cancelled) => {
                        tracing::debug!("image selection cancelled");
                        Event::PickCancelled
                    }
                    Err(error) => {
                        tracing::warn!(%error, "image picker failed");
                        Event::PickFailed(error)
                    }
                }
            }
            Completion::Classify {
                generation,
                result: Ok(predictions),
            } => {
                tracing::info!(%generation, count = predictions.len(), "classification finished");
                Event::Classified {
                    generation,
                    predictions,
                }
            }
            Completion::Classify {
                generation,
                result: Err(error),
            } => {
                tracing::warn!(%generation, %error, "classification failed");
                Event::ClassifyFailed { generation, error }
            }
        };
        self.apply(event);
    }

    fn apply(&mut self, event: Event) {
        if let Some(effect) = self.state.apply(event) {
            self.run(effect);
        }
    }

    fn run(&mut self, effect: Effect) {
        match effect {
            Effect::InitEngine => {
                let engine = self.engine.clone();
                self.pending
                    .push(async move { Completion::Engine(engine.ready().await) }.boxed());
            }
            Effect::LoadModel => {
                let engine = self.engine.clone();
                self.pending
                    .push(async move { Completion::Model(engine.load_model().await) }.boxed());
            }
            Effect::Classify { image, generation } => {
                let model = match (&self.model, self.state.model_ready) {
                    (Some(model), true) => model.clone(),
                    _ => {
                        tracing::warn!(%image, "classification requested without a loaded model");
                        return;
                    }
                };
                let decoder = self.decoder.clone();
                tracing::debug!(%image, %generation, "classifying");
                self.pending.push(
                    async move {
                        let result = classify(decoder.as_ref(), model.as_ref(), &image).await;
                        Completion::Classify { generation, result }
                    }
                    .boxed(),
                );
                self.apply(Event::ClassifyStarted(generation));
            }
        }
    }
}

/// Fetch, decode and classify one image.
pub async fn classify(
    decoder: &dyn Decoder,
    model: &dyn Model,
    image: &ImageRef,
) -> Result<Vec<Prediction>, ClassifyError> {
    let bytes = decoder.fetch_bytes(image).await?;
    let tensor = decoder.decode(bytes).await?;
    model.classify(tensor).await
}
