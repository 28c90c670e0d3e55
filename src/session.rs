// Annotation session: owns capture, detector and models for one overlay

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureHandle, FrameSource};
use crate::classifier::Models;
use crate::config::CaptureConfig;
use crate::detector::LandmarkDetector;
use crate::error::{OverlayError, Result};
use crate::models::{BoundingBox, Frame, LabelSet};

/// Where model loading stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

enum ModelState {
    Uninitialized,
    Loading(oneshot::Receiver<Result<Models>>),
    Ready(Models),
    Failed(String),
}

impl ModelState {
    fn readiness(&self) -> Readiness {
        match self {
            ModelState::Uninitialized => Readiness::Uninitialized,
            ModelState::Loading(_) => Readiness::Loading,
            ModelState::Ready(_) => Readiness::Ready,
            ModelState::Failed(_) => Readiness::Failed,
        }
    }

    fn settle(result: Result<Models>) -> Self {
        match result {
            Ok(models) => {
                info!("Models loaded");
                ModelState::Ready(models)
            }
            Err(e) => {
                error!("Model loading failed: {}", e);
                ModelState::Failed(e.to_string())
            }
        }
    }
}

/// Whether frames are currently being captured
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraState {
    Off,
    On,
}

/// What to draw for one frame
#[derive(Clone, Debug, PartialEq)]
pub enum Annotation {
    /// No face in the frame; nothing is drawn
    NoFace,
    /// A face; labels are absent until models are ready
    Face {
        bbox: BoundingBox,
        labels: Option<LabelSet>,
    },
}

/// Per-session frame counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub faces: u64,
    pub labelled: u64,
    pub skipped_not_ready: u64,
    pub failed: u64,
}

/// Owns everything the overlay needs between frames.
///
/// Frames are processed one at a time through `&mut self`.
pub struct AnnotationSession {
    detector: Box<dyn LandmarkDetector>,
    models: ModelState,
    capture: Option<CaptureHandle>,
    stats: FrameStats,
}

impl AnnotationSession {
    pub fn new(detector: Box<dyn LandmarkDetector>) -> Self {
        Self {
            detector,
            models: ModelState::Uninitialized,
            capture: None,
            stats: FrameStats::default(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.models.readiness()
    }

    /// The loading error, once loading has failed
    pub fn failure(&self) -> Option<&str> {
        match &self.models {
            ModelState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Starts loading models on a blocking task. Ignored while loading is in
    /// progress or models are ready. Outside a tokio runtime loading fails
    /// at once.
    pub fn begin_loading<F>(&mut self, loader: F)
    where
        F: FnOnce() -> Result<Models> + Send + 'static,
    {
        match self.models.readiness() {
            Readiness::Loading | Readiness::Ready => {
                warn!("Model loading already {:?}", self.models.readiness());
                return;
            }
            Readiness::Uninitialized | Readiness::Failed => {}
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot load models outside a tokio runtime: {}", e);
                self.models = ModelState::Failed(format!("no tokio runtime: {e}"));
                return;
            }
        };

        let (sender, receiver) = oneshot::channel();
        runtime.spawn_blocking(move || {
            let _ = sender.send(loader());
        });
        self.models = ModelState::Loading(receiver);
        info!("Model loading started");
    }

    /// Installs already loaded models
    pub fn install_models(&mut self, models: Models) {
        self.models = ModelState::Ready(models);
    }

    /// Moves `Loading` to `Ready` or `Failed` if the loader has finished.
    pub fn poll_models(&mut self) -> Readiness {
        if let ModelState::Loading(receiver) = &mut self.models {
            match receiver.try_recv() {
                Ok(result) => self.models = ModelState::settle(result),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => {
                    error!("Model loader exited without a result");
                    self.models = ModelState::Failed("loader exited".to_string());
                }
            }
        }
        self.models.readiness()
    }

    /// Waits for an in-progress load to finish
    pub async fn wait_for_models(&mut self) -> Readiness {
        if let ModelState::Loading(_) = self.models {
            if let ModelState::Loading(receiver) =
                std::mem::replace(&mut self.models, ModelState::Uninitialized)
            {
                self.models = match receiver.await {
                    Ok(result) => ModelState::settle(result),
                    Err(_) => ModelState::Failed("loader exited".to_string()),
                };
            }
        }
        self.models.readiness()
    }

    pub fn camera_state(&self) -> CameraState {
        match &self.capture {
            Some(capture) if capture.is_running() => CameraState::On,
            _ => CameraState::Off,
        }
    }

    /// Starts capturing from `source`, replacing any running capture.
    ///
    /// On failure the camera stays off and the caller shows the placeholder.
    pub async fn start_camera(
        &mut self,
        source: Box<dyn FrameSource>,
        config: &CaptureConfig,
    ) -> Result<mpsc::Receiver<Frame>> {
        self.stop_camera().await;
        let (handle, frames) =
            CaptureHandle::start(source, config.frame_interval(), config.channel_capacity)?;
        self.capture = Some(handle);
        Ok(frames)
    }

    /// Stops capture and releases the source. No-op when nothing runs.
    pub async fn stop_camera(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop().await;
        }
    }

    /// Runs the pipeline on one frame.
    ///
    /// Only the first detected face is used. Without ready models, or when
    /// labelling fails, the frame yields the bounding box only. Errors come
    /// from landmark detection alone.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<Annotation> {
        self.stats.frames += 1;
        let readiness = self.poll_models();

        let faces = self.detector.detect(frame).inspect_err(|e| {
            self.stats.failed += 1;
            warn!("Landmark detection failed: {}", e);
        })?;
        let Some(landmarks) = faces.into_iter().next() else {
            return Ok(Annotation::NoFace);
        };
        let Some(bbox) = BoundingBox::enclosing(&landmarks, frame.width, frame.height) else {
            return Ok(Annotation::NoFace);
        };
        self.stats.faces += 1;

        let ModelState::Ready(models) = &mut self.models else {
            debug!("Models {:?}, drawing box only", readiness);
            self.stats.skipped_not_ready += 1;
            return Ok(Annotation::Face { bbox, labels: None });
        };

        let labels = match models.label(&landmarks) {
            Ok(labels) => {
                self.stats.labelled += 1;
                Some(labels)
            }
            Err(OverlayError::FeatureWidthMismatch { expected, actual }) => {
                self.stats.failed += 1;
                error!("Labelling failed: feature width {} != {}", actual, expected);
                None
            }
            Err(e) => {
                self.stats.failed += 1;
                error!("Labelling failed: {}", e);
                None
            }
        };
        Ok(Annotation::Face { bbox, labels })
    }

    /// Processes frames until the capture ends, handing each annotation to
    /// `on_frame`. A frame whose detection fails is still handed over, with
    /// nothing to draw.
    pub async fn run<F>(&mut self, frames: &mut mpsc::Receiver<Frame>, mut on_frame: F) -> Result<()>
    where
        F: FnMut(&Frame, &Annotation) -> Result<()>,
    {
        while let Some(frame) = frames.recv().await {
            let annotation = self.process_frame(&frame).unwrap_or_else(|e| {
                warn!("Drawing frame without annotation: {}", e);
                Annotation::NoFace
            });
            on_frame(&frame, &annotation)?;
        }
        Ok(())
    }
}

impl Drop for AnnotationSession {
    fn drop(&mut self) {
        // CaptureHandle's own Drop signals the pump to close the source.
        if self.capture.take().is_some() {
            info!("Session dropped with capture running");
        }
    }
}
