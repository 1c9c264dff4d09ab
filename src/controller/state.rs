//! Screen state and the reducer that owns every transition.

use crate::error::ClassifyError;
use crate::models::classify_types::{ImageRef, Prediction};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    EngineLoading,
    ModelLoading,
    Idle,
    ImageSelected,
    Classifying,
    Classified,
    Failed,
    /// Engine or model failed to come up. Left only by an explicit re-mount.
    Unavailable,
}

/// Identifies one image selection. Results tagged with an older generation
/// are discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Mounted,
    EngineReady,
    EngineFailed(ClassifyError),
    ModelLoaded,
    ModelFailed(ClassifyError),
    ImagePicked(ImageRef),
    PickCancelled,
    PickFailed(ClassifyError),
    ClassifyStarted(Generation),
    Classified {
        generation: Generation,
        predictions: Vec<Prediction>,
    },
    ClassifyFailed {
        generation: Generation,
        error: ClassifyError,
    },
}

/// Work the controller must start in response to a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    InitEngine,
    LoadModel,
    Classify {
        image: ImageRef,
        generation: Generation,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenState {
    pub phase: Phase,
    pub engine_ready: bool,
    pub model_ready: bool,
    pub current_image: Option<ImageRef>,
    pub predictions: Vec<Prediction>,
    pub generation: Generation,
    pub last_error: Option<ClassifyError>,
}

impl Default for ScreenState {
    fn default() -> Self {
        Self {
            phase: Phase::Init,
            engine_ready: false,
            model_ready: false,
            current_image: None,
            predictions: Vec::new(),
            generation: Generation::default(),
            last_error: None,
        }
    }
}

impl ScreenState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image selection is only offered once the model is up.
    pub fn can_select(&self) -> bool {
        self.model_ready
    }

    pub fn apply(&mut self, event: Event) -> Option<Effect> {
        match event {
            Event::Mounted => match self.phase {
                Phase::Init | Phase::Unavailable => {
                    *self = ScreenState {
                        phase: Phase::EngineLoading,
                        generation: self.generation,
                        ..ScreenState::default()
                    };
                    Some(Effect::InitEngine)
                }
                _ => None,
            },

            Event::EngineReady if self.phase == Phase::EngineLoading => {
                self.engine_ready = true;
                self.phase = Phase::ModelLoading;
                Some(Effect::LoadModel)
            }

            Event::ModelLoaded if self.phase == Phase::ModelLoading => {
                self.model_ready = true;
                match self.current_image.clone() {
                    Some(image) => {
                        self.phase = Phase::ImageSelected;
                        Some(Effect::Classify {
                            image,
                            generation: self.generation,
                        })
                    }
                    None => {
                        self.phase = Phase::Idle;
                        None
                    }
                }
            }

            Event::EngineFailed(error) if self.phase == Phase::EngineLoading => {
                self.fail_initialization(error);
                None
            }

            Event::ModelFailed(error) if self.phase == Phase::ModelLoading => {
                self.fail_initialization(error);
                None
            }

            Event::ImagePicked(image) => {
                if !self.can_select() {
                    tracing::debug!(%image, "ignoring selection before model is ready");
                    return None;
                }
                self.generation = self.generation.next();
                self.current_image = Some(image.clone());
                self.predictions.clear();
                self.last_error = None;
                self.phase = Phase::ImageSelected;
                Some(Effect::Classify {
                    image,
                    generation: self.generation,
                })
            }

            Event::PickCancelled => None,

            Event::PickFailed(error) => {
                self.last_error = Some(error);
                None
            }

            Event::ClassifyStarted(generation) => {
                if self.is_current(generation) && self.phase == Phase::ImageSelected {
                    self.phase = Phase::Classifying;
                }
                None
            }

            Event::Classified {
                generation,
                predictions,
            } => {
                if !self.is_current(generation) {
                    tracing::debug!(%generation, current = %self.generation, "discarding stale predictions");
                    return None;
                }
                self.predictions = predictions;
                self.phase = Phase::Classified;
                None
            }

            Event::ClassifyFailed { generation, error } => {
                if !self.is_current(generation) {
                    tracing::debug!(%generation, current = %self.generation, "discarding stale failure");
                    return None;
                }
                self.predictions.clear();
                self.last_error = Some(error);
                self.phase = Phase::Failed;
                None
            }

            other => {
                tracing::debug!(event = ?other, phase = ?self.phase, "event ignored in current phase");
                None
            }
        }
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.current_image.is_some() && self.model_ready && generation == self.generation
    }

    fn fail_initialization(&mut self, error: ClassifyError) {
        self.phase = Phase::Unavailable;
        self.last_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_state() -> ScreenState {
        let mut state = ScreenState::new();
        assert_eq!(state.apply(Event::Mounted), Some(Effect::InitEngine));
        assert_eq!(state.apply(Event::EngineReady), Some(Effect::LoadModel));
        assert_eq!(state.apply(Event::ModelLoaded), None);
        assert_eq!(state.phase, Phase::Idle);
        state
    }

    fn prediction(name: &str) -> Prediction {
        Prediction {
            class_name: name.to_string(),
            probability: 0.9,
        }
    }

    fn generation_of(effect: Option<Effect>) -> Generation {
        match effect {
            Some(Effect::Classify { generation, .. }) => generation,
            other => panic!("expected classify effect, got {other:?}"),
        }
    }

    #[test]
    fn loading_sequence_reaches_idle() {
        let state = ready_state();
        assert!(state.engine_ready);
        assert!(state.model_ready);
        assert!(state.can_select());
        assert!(state.current_image.is_none());
    }

    #[test]
    fn mount_twice_is_noop() {
        let mut state = ScreenState::new();
        state.apply(Event::Mounted);
        assert_eq!(state.apply(Event::Mounted), None);
        assert_eq!(state.phase, Phase::EngineLoading);
    }

    #[test]
    fn selection_before_model_ready_is_ignored() {
        let mut state = ScreenState::new();
        state.apply(Event::Mounted);
        state.apply(Event::EngineReady);

        assert_eq!(state.apply(Event::ImagePicked(ImageRef::new("a.jpg"))), None);
        assert!(state.current_image.is_none());
        assert_eq!(state.phase, Phase::ModelLoading);
    }

    #[test]
    fn picked_image_schedules_classification() {
        let mut state = ready_state();
        let effect = state.apply(Event::ImagePicked(ImageRef::new("a.jpg")));
        let generation = generation_of(effect);
        assert_eq!(state.phase, Phase::ImageSelected);

        state.apply(Event::ClassifyStarted(generation));
        assert_eq!(state.phase, Phase::Classifying);

        state.apply(Event::Classified {
            generation,
            predictions: vec![prediction("tabby")],
        });
        assert_eq!(state.phase, Phase::Classified);
        assert_eq!(state.predictions, vec![prediction("tabby")]);
    }

    #[test]
    fn reselection_clears_predictions_and_discards_late_result() {
        let mut state = ready_state();
        let first = generation_of(state.apply(Event::ImagePicked(ImageRef::new("a.jpg"))));
        state.apply(Event::Classified {
            generation: first,
            predictions: vec![prediction("tabby")],
        });

        let second = generation_of(state.apply(Event::ImagePicked(ImageRef::new("b.jpg"))));
        assert!(second > first);
        assert!(state.predictions.is_empty());

        state.apply(Event::Classified {
            generation: first,
            predictions: vec![prediction("stale")],
        });
        assert!(state.predictions.is_empty());
        assert_eq!(state.phase, Phase::ImageSelected);

        state.apply(Event::ClassifyFailed {
            generation: first,
            error: ClassifyError::Decode("late".into()),
        });
        assert_eq!(state.last_error, None);
    }

    #[test]
    fn current_failure_leaves_screen_interactive() {
        let mut state = ready_state();
        let generation = generation_of(state.apply(Event::ImagePicked(ImageRef::new("a.jpg"))));
        state.apply(Event::ClassifyFailed {
            generation,
            error: ClassifyError::Fetch("offline".into()),
        });

        assert_eq!(state.phase, Phase::Failed);
        assert!(state.predictions.is_empty());
        assert_eq!(state.last_error, Some(ClassifyError::Fetch("offline".into())));
        assert!(state.can_select());

        let effect = state.apply(Event::ImagePicked(ImageRef::new("b.jpg")));
        assert!(matches!(effect, Some(Effect::Classify { .. })));
        assert_eq!(state.last_error, None);
    }

    #[test]
    fn cancellation_changes_nothing() {
        let mut state = ready_state();
        let generation = generation_of(state.apply(Event::ImagePicked(ImageRef::new("a.jpg"))));
        state.apply(Event::Classified {
            generation,
            predictions: vec![prediction("tabby")],
        });
        let before = state.clone();

        assert_eq!(state.apply(Event::PickCancelled), None);
        assert_eq!(state, before);
    }

    #[test]
    fn pick_error_is_retained_without_touching_selection() {
        let mut state = ready_state();
        state.apply(Event::PickFailed(ClassifyError::ImagePick("denied".into())));
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.current_image.is_none());
        assert!(matches!(state.last_error, Some(ClassifyError::ImagePick(_))));
    }

    #[test]
    fn init_failure_is_recoverable_by_remount() {
        let mut state = ScreenState::new();
        state.apply(Event::Mounted);
        state.apply(Event::EngineReady);
        state.apply(Event::ModelFailed(ClassifyError::ModelLoad("404".into())));
        assert_eq!(state.phase, Phase::Unavailable);
        assert!(!state.can_select());

        assert_eq!(state.apply(Event::Mounted), Some(Effect::InitEngine));
        assert_eq!(state.phase, Phase::EngineLoading);
        assert!(!state.engine_ready);
        assert_eq!(state.last_error, None);
    }

    #[test]
    fn out_of_order_readiness_is_ignored() {
        let mut state = ScreenState::new();
        assert_eq!(state.apply(Event::ModelLoaded), None);
        assert!(!state.model_ready);
        assert_eq!(state.apply(Event::EngineReady), None);
        assert_eq!(state.phase, Phase::Init);
    }
}
