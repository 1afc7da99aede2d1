//! Live recognition loop.
//!
//! One run walks `Idle -> AwaitingModel -> Capturing -> (Finishing) -> Stopped`.
//! Only a missing model or an unavailable device abort the run; every
//! per-frame problem becomes a [`FrameStatus`] and the loop moves on.

use crate::attendance::MarkOutcome;
use crate::error::{AttendanceError, Result};
use crate::labels::IdentityLabelMap;
use crate::model_store::ModelStore;
use crate::models::{IdentityKey, RecognitionResult, TrainedModel};
use crate::normalize::{normalize_region, to_gray};
use image::DynamicImage;
use providers::{CameraOpener, FaceDetector, FrameSource};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const FINISH_POLL: Duration = Duration::from_millis(50);

/// Receives accepted identities. Implemented by the attendance writer.
pub trait AttendanceSink {
    fn mark_present(&mut self, class_name: &str, roll_no: &str, date: &str) -> Result<MarkOutcome>;
}

/// Display surface for the running loop. Both hooks default to no-ops.
pub trait StatusObserver {
    fn on_state(&mut self, _state: EngineState) {}
    fn on_frame(&mut self, _status: &FrameStatus) {}
}

pub struct SilentObserver;

impl StatusObserver for SilentObserver {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    AwaitingModel,
    Capturing,
    Finishing,
    Stopped,
}

/// Transient outcome of one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FrameStatus {
    NoFace,
    DetectionFailed { reason: String },
    Unknown { label: u32, confidence: f64 },
    LabelFormatError { key: String },
    SheetMissing { class_name: String },
    NotFound { identity: IdentityKey },
    WriteFailed { identity: IdentityKey, reason: String },
    Marked { identity: IdentityKey },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    CaptureEnded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Marked { identity: IdentityKey },
    NoMarkMade { reason: EndReason },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept(IdentityKey),
    Unknown,
    LabelFormat(String),
}

/// Confidence gate followed by the inverse label lookup.
///
/// A prediction is accepted only when its distance is strictly below
/// `threshold` and its label belongs to `label_map`.
pub fn decide(prediction: &RecognitionResult, label_map: &IdentityLabelMap, threshold: f64) -> Decision {
    // NaN never passes
    let below = prediction.confidence < threshold;
    if !below {
        return Decision::Unknown;
    }
    let Some(key) = label_map.key_of(prediction.label) else {
        return Decision::Unknown;
    };
    match IdentityKey::parse(key) {
        Ok(identity) => Decision::Accept(identity),
        Err(_) => Decision::LabelFormat(key.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct RecognitionSettings {
    pub confidence_threshold: f64,
    pub finish_delay: Duration,
    /// Attendance column written on a successful mark.
    pub date: String,
}

pub struct RecognitionEngine {
    store: ModelStore,
    opener: Box<dyn CameraOpener>,
    detector: Box<dyn FaceDetector>,
    sink: Box<dyn AttendanceSink>,
    observer: Box<dyn StatusObserver>,
    settings: RecognitionSettings,
    cancel: Arc<AtomicBool>,
    state: EngineState,
}

impl RecognitionEngine {
    pub fn new(
        store: ModelStore,
        opener: Box<dyn CameraOpener>,
        detector: Box<dyn FaceDetector>,
        sink: Box<dyn AttendanceSink>,
        settings: RecognitionSettings,
    ) -> Self {
        Self {
            store,
            opener,
            detector,
            sink,
            observer: Box::new(SilentObserver),
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
            state: EngineState::Idle,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn StatusObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Uses `cancel` as the stop signal. Setting it stops the loop before the next frame.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Runs the loop to a terminal outcome. The device is held only inside
    /// this call and is dropped on every return path.
    pub fn run(&mut self) -> Result<RunOutcome> {
        self.enter(EngineState::Idle);
        let result = self.run_inner();
        self.enter(EngineState::Stopped);
        result
    }

    fn run_inner(&mut self) -> Result<RunOutcome> {
        self.enter(EngineState::AwaitingModel);
        let model = self.store.load()?.ok_or(AttendanceError::ModelNotTrained)?;
        info!(
            "loaded model with {} identities (trained {})",
            model.label_map.len(),
            model.trained_at
        );

        let mut source = self
            .opener
            .open()
            .map_err(|e| AttendanceError::DeviceUnavailable(e.to_string()))?;
        self.enter(EngineState::Capturing);
        self.capture_loop(source.as_mut(), &model)
    }

    fn capture_loop(&mut self, source: &mut dyn FrameSource, model: &TrainedModel) -> Result<RunOutcome> {
        loop {
            if self.cancelled() {
                info!("recognition cancelled");
                return Ok(RunOutcome::NoMarkMade {
                    reason: EndReason::Cancelled,
                });
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("capture ended without a mark");
                    return Ok(RunOutcome::NoMarkMade {
                        reason: EndReason::CaptureEnded,
                    });
                }
                Err(e) => {
                    warn!("frame read failed, ending capture: {e}");
                    return Ok(RunOutcome::NoMarkMade {
                        reason: EndReason::CaptureEnded,
                    });
                }
            };

            let status = self.process_frame(&frame, model);
            log_status(&status);
            self.observer.on_frame(&status);

            if let FrameStatus::Marked { identity } = status {
                self.enter(EngineState::Finishing);
                self.linger();
                return Ok(RunOutcome::Marked { identity });
            }
        }
    }

    fn process_frame(&mut self, frame: &DynamicImage, model: &TrainedModel) -> FrameStatus {
        let gray = to_gray(frame);
        let regions = match self.detector.detect(&gray) {
            Ok(regions) => regions,
            Err(e) => {
                return FrameStatus::DetectionFailed {
                    reason: e.to_string(),
                }
            }
        };
        // first region only; additional faces in the frame are ignored
        let Some(region) = regions.first() else {
            return FrameStatus::NoFace;
        };
        let face_size = model.artifact.params().face_size;
        let Some(face) = normalize_region(&gray, region, face_size) else {
            return FrameStatus::NoFace;
        };
        let (label, confidence) = match model.artifact.predict(&face) {
            Ok(prediction) => prediction,
            Err(e) => {
                return FrameStatus::DetectionFailed {
                    reason: e.to_string(),
                }
            }
        };
        let prediction = RecognitionResult {
            label,
            confidence,
            bounding_box: *region,
        };

        match decide(&prediction, &model.label_map, self.settings.confidence_threshold) {
            Decision::Unknown => FrameStatus::Unknown { label, confidence },
            Decision::LabelFormat(key) => FrameStatus::LabelFormatError { key },
            Decision::Accept(identity) => self.mark(identity),
        }
    }

    fn mark(&mut self, identity: IdentityKey) -> FrameStatus {
        let date = self.settings.date.as_str();
        match self
            .sink
            .mark_present(&identity.class_name, &identity.roll_no, date)
        {
            Ok(MarkOutcome::Marked) => FrameStatus::Marked { identity },
            Ok(MarkOutcome::NotFound) => FrameStatus::NotFound { identity },
            Ok(MarkOutcome::SheetMissing) => FrameStatus::SheetMissing {
                class_name: identity.class_name,
            },
            Err(e) => FrameStatus::WriteFailed {
                identity,
                reason: e.to_string(),
            },
        }
    }

    /// Keeps the decision on screen for the finish delay. A stop signal cuts it short.
    fn linger(&self) {
        let deadline = Instant::now() + self.settings.finish_delay;
        loop {
            let now = Instant::now();
            if now >= deadline || self.cancelled() {
                return;
            }
            std::thread::sleep(FINISH_POLL.min(deadline - now));
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn enter(&mut self, state: EngineState) {
        debug!("recognition state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.observer.on_state(state);
    }
}

fn log_status(status: &FrameStatus) {
    match status {
        FrameStatus::NoFace => debug!("no face in frame"),
        FrameStatus::DetectionFailed { reason } => warn!("frame skipped: {reason}"),
        FrameStatus::Unknown { label, confidence } => {
            debug!("unknown face (label {label}, confidence {confidence:.2})")
        }
        FrameStatus::LabelFormatError { key } => warn!("malformed identity key {key:?}"),
        FrameStatus::SheetMissing { class_name } => warn!("no sheet for class {class_name}"),
        FrameStatus::NotFound { identity } => {
            warn!("roll {} not found in sheet {}", identity.roll_no, identity.class_name)
        }
        FrameStatus::WriteFailed { identity, reason } => {
            warn!("could not mark {identity}: {reason}")
        }
        FrameStatus::Marked { identity } => info!("marked {identity} present"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lbph::tests::{checker_face, gradient_face, params};
    use crate::lbph::LbphModel;
    use chrono::Utc;
    use image::GrayImage;
    use providers::{FaceRegion, ProviderError};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(String, String, String)>>>;

    struct FakeSource {
        frames: VecDeque<DynamicImage>,
        released: Arc<AtomicBool>,
        cancel_after: Option<(usize, Arc<AtomicBool>)>,
        served: usize,
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> std::result::Result<Option<DynamicImage>, ProviderError> {
            self.served += 1;
            if let Some((n, flag)) = &self.cancel_after {
                if self.served >= *n {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            Ok(self.frames.pop_front())
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct FakeOpener {
        frames: Vec<GrayImage>,
        fail: bool,
        opened: Arc<AtomicBool>,
        released: Arc<AtomicBool>,
        cancel_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl FakeOpener {
        fn with_frames(frames: Vec<GrayImage>) -> Self {
            Self {
                frames,
                fail: false,
                opened: Arc::new(AtomicBool::new(false)),
                released: Arc::new(AtomicBool::new(false)),
                cancel_after: None,
            }
        }
    }

    impl CameraOpener for FakeOpener {
        fn open(&self) -> std::result::Result<Box<dyn FrameSource>, ProviderError> {
            self.opened.store(true, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::DeviceUnavailable("no camera".into()));
            }
            Ok(Box::new(FakeSource {
                frames: self.frames.iter().cloned().map(DynamicImage::ImageLuma8).collect(),
                released: self.released.clone(),
                cancel_after: self.cancel_after.clone(),
                served: 0,
            }))
        }
    }

    /// Whole frame as a face, except for all-black frames.
    struct BlankAwareDetector;

    impl FaceDetector for BlankAwareDetector {
        fn detect(&mut self, frame: &GrayImage) -> std::result::Result<Vec<FaceRegion>, ProviderError> {
            if frame.pixels().all(|p| p.0[0] == 0) {
                return Ok(vec![]);
            }
            Ok(vec![FaceRegion::new(0, 0, frame.width(), frame.height())])
        }
    }

    struct ScriptedSink {
        outcomes: VecDeque<MarkOutcome>,
        calls: Calls,
    }

    impl AttendanceSink for ScriptedSink {
        fn mark_present(&mut self, class_name: &str, roll_no: &str, date: &str) -> Result<MarkOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((class_name.into(), roll_no.into(), date.into()));
            Ok(self.outcomes.pop_front().unwrap_or(MarkOutcome::Marked))
        }
    }

    struct Recorder(Arc<Mutex<Vec<FrameStatus>>>);

    impl StatusObserver for Recorder {
        fn on_frame(&mut self, status: &FrameStatus) {
            self.0.lock().unwrap().push(status.clone());
        }
    }

    fn trained_store(temp: &tempfile::TempDir) -> ModelStore {
        let mut artifact = LbphModel::new(params()).unwrap();
        let mut label_map = IdentityLabelMap::new();
        let seven = label_map.label_for_or_insert(&IdentityKey::new("ClassA", "7"));
        let nine = label_map.label_for_or_insert(&IdentityKey::new("ClassA", "9"));
        artifact.add(&gradient_face(0), seven);
        artifact.add(&checker_face(), nine);
        let store = ModelStore::new(temp.path().join("model.bin"));
        store
            .save(&TrainedModel {
                artifact,
                label_map,
                trained_at: Utc::now(),
            })
            .unwrap();
        store
    }

    fn settings() -> RecognitionSettings {
        RecognitionSettings {
            confidence_threshold: 50.0,
            finish_delay: Duration::from_millis(0),
            date: "19-10-2026".into(),
        }
    }

    fn engine(
        store: ModelStore,
        opener: FakeOpener,
        outcomes: Vec<MarkOutcome>,
    ) -> (RecognitionEngine, Calls, Arc<Mutex<Vec<FrameStatus>>>) {
        let calls: Calls = Arc::default();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = ScriptedSink {
            outcomes: outcomes.into(),
            calls: calls.clone(),
        };
        let engine = RecognitionEngine::new(
            store,
            Box::new(opener),
            Box::new(BlankAwareDetector),
            Box::new(sink),
            settings(),
        )
        .with_observer(Box::new(Recorder(statuses.clone())));
        (engine, calls, statuses)
    }

    fn prediction(label: u32, confidence: f64) -> RecognitionResult {
        RecognitionResult {
            label,
            confidence,
            bounding_box: FaceRegion::new(0, 0, 10, 10),
        }
    }

    fn scenario_map() -> IdentityLabelMap {
        let mut map = IdentityLabelMap::new();
        map.label_for_or_insert(&IdentityKey::new("ClassA", "7"));
        map.label_for_or_insert(&IdentityKey::new("ClassA", "9"));
        map
    }

    #[test]
    fn accepted_prediction_resolves_identity() {
        let decision = decide(&prediction(0, 40.0), &scenario_map(), 150.0);
        assert_eq!(decision, Decision::Accept(IdentityKey::new("ClassA", "7")));
    }

    #[test]
    fn confidence_at_or_above_threshold_is_unknown() {
        let map = scenario_map();
        for confidence in [150.0, 150.0001, 400.0, f64::NAN] {
            assert_eq!(decide(&prediction(0, confidence), &map, 150.0), Decision::Unknown);
        }
    }

    #[test]
    fn label_outside_the_map_is_unknown() {
        assert_eq!(decide(&prediction(7, 1.0), &scenario_map(), 150.0), Decision::Unknown);
    }

    #[test]
    fn malformed_key_is_reported() {
        let map = IdentityLabelMap::from(vec!["nodash".to_string()]);
        assert_eq!(
            decide(&prediction(0, 1.0), &map, 150.0),
            Decision::LabelFormat("nodash".into())
        );
    }

    #[test]
    fn missing_model_fails_before_opening_the_device() {
        let temp = tempfile::tempdir().unwrap();
        let store = ModelStore::new(temp.path().join("absent.bin"));
        let opener = FakeOpener::with_frames(vec![checker_face()]);
        let opened = opener.opened.clone();
        let (mut engine, calls, _) = engine(store, opener, vec![]);

        assert!(matches!(engine.run(), Err(AttendanceError::ModelNotTrained)));
        assert!(!opened.load(Ordering::SeqCst));
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn device_failure_is_fatal_and_touches_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let mut opener = FakeOpener::with_frames(vec![]);
        opener.fail = true;
        let (mut engine, calls, statuses) = engine(trained_store(&temp), opener, vec![]);

        assert!(matches!(engine.run(), Err(AttendanceError::DeviceUnavailable(_))));
        assert!(calls.lock().unwrap().is_empty());
        assert!(statuses.lock().unwrap().is_empty());
    }

    #[test]
    fn recognized_face_is_marked_and_loop_stops() {
        let temp = tempfile::tempdir().unwrap();
        let opener = FakeOpener::with_frames(vec![
            GrayImage::new(32, 32),
            checker_face(),
            gradient_face(0),
        ]);
        let released = opener.released.clone();
        let (mut engine, calls, statuses) = engine(trained_store(&temp), opener, vec![]);

        let outcome = engine.run().unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Marked {
                identity: IdentityKey::new("ClassA", "9")
            }
        );
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[("ClassA".to_string(), "9".to_string(), "19-10-2026".to_string())]
        );
        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses.len(), 2, "third frame must not be processed");
        assert_eq!(statuses[0], FrameStatus::NoFace);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn sheet_missing_and_not_found_keep_scanning() {
        let temp = tempfile::tempdir().unwrap();
        let opener = FakeOpener::with_frames(vec![checker_face(), checker_face(), gradient_face(3)]);
        let (mut engine, calls, statuses) = engine(
            trained_store(&temp),
            opener,
            vec![MarkOutcome::SheetMissing, MarkOutcome::NotFound, MarkOutcome::Marked],
        );

        let outcome = engine.run().unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Marked {
                identity: IdentityKey::new("ClassA", "7")
            }
        );
        assert_eq!(calls.lock().unwrap().len(), 3);
        let statuses = statuses.lock().unwrap();
        assert!(matches!(statuses[0], FrameStatus::SheetMissing { .. }));
        assert!(matches!(statuses[1], FrameStatus::NotFound { .. }));
    }

    #[test]
    fn strict_threshold_leaves_every_frame_unknown() {
        let temp = tempfile::tempdir().unwrap();
        let opener = FakeOpener::with_frames(vec![checker_face(), gradient_face(0)]);
        let released = opener.released.clone();
        let (mut engine, calls, statuses) = engine(trained_store(&temp), opener, vec![]);
        // exact matches have distance zero, which is not below a zero threshold
        engine.settings.confidence_threshold = 0.0;

        let outcome = engine.run().unwrap();
        assert_eq!(
            outcome,
            RunOutcome::NoMarkMade {
                reason: EndReason::CaptureEnded
            }
        );
        assert!(calls.lock().unwrap().is_empty());
        assert!(statuses
            .lock()
            .unwrap()
            .iter()
            .all(|s| matches!(s, FrameStatus::Unknown { .. })));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn cancellation_is_checked_before_the_next_frame() {
        let temp = tempfile::tempdir().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut opener = FakeOpener::with_frames(vec![GrayImage::new(32, 32), checker_face()]);
        opener.cancel_after = Some((1, cancel.clone()));
        let released = opener.released.clone();
        let (engine, calls, statuses) = engine(trained_store(&temp), opener, vec![]);
        let mut engine = engine.with_cancel(cancel);

        let outcome = engine.run().unwrap();
        assert_eq!(
            outcome,
            RunOutcome::NoMarkMade {
                reason: EndReason::Cancelled
            }
        );
        // the in-flight frame still completes
        assert_eq!(statuses.lock().unwrap().as_slice(), &[FrameStatus::NoFace]);
        assert!(calls.lock().unwrap().is_empty());
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn write_failures_do_not_stop_the_loop() {
        struct FailingSink;
        impl AttendanceSink for FailingSink {
            fn mark_present(&mut self, _: &str, _: &str, _: &str) -> Result<MarkOutcome> {
                Err(AttendanceError::Workbook("locked".into()))
            }
        }

        let temp = tempfile::tempdir().unwrap();
        let opener = FakeOpener::with_frames(vec![checker_face(), checker_face()]);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let mut engine = RecognitionEngine::new(
            trained_store(&temp),
            Box::new(opener),
            Box::new(BlankAwareDetector),
            Box::new(FailingSink),
            settings(),
        )
        .with_observer(Box::new(Recorder(statuses.clone())));

        let outcome = engine.run().unwrap();
        assert_eq!(
            outcome,
            RunOutcome::NoMarkMade {
                reason: EndReason::CaptureEnded
            }
        );
        assert_eq!(statuses.lock().unwrap().len(), 2);
    }
}
