//! Calibration session state machine.
//!
//! Three ordered phases, each processing a mask exposure into a mosaic,
//! locating the expected objects on it, and fitting the rigid offset. The
//! session runs on a single control thread: workers post generation-tagged
//! replies over a channel, and only `poll`/`wait_result` (called from the
//! control thread) mutate state. A new request while a worker is in flight
//! cooperatively cancels the old worker and bumps the generation, so stale
//! completions are dropped rather than applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use mes_math::{CorrespondencePair, RigidTransform, TransformFitter};
use shared::expected_positions::ExpectedPosition;
use shared::frame_source::{ImageSource, RawFramePair};
use shared::image_proc::mask::DragMask;
use shared::status::{scalar_or_unknown, StatusService};

use crate::callback::{AlignmentCallback, AlignmentEvent, CallbackId};
use crate::config::{PhaseFrames, SessionConfig};
use crate::error::PhaseError;
use crate::frame_processor::{DebugSink, FrameProcessor, MosaicImage, ProcessOutcome};
use crate::locator::{LocateAllOutcome, LocatorError, ObjectLocator};
use crate::offset_log::{format_phase_record, LogSink};
use crate::state::{CalibrationPhase, PhaseState};
use crate::worker::{spawn_worker, WorkerHandle, WorkerMessage, WorkerReply};

/// Residual magnitude above which the automatic prune deactivates pairs, px.
pub const OUTLIER_RESIDUAL_PX: f64 = 2.0;
/// Frames advance in chip pairs, so a completed phase steps the next mask
/// frame by two.
pub const MASK_FRAME_STEP: u32 = 2;
/// Status item queried for the telescope altitude.
pub const ALTITUDE_STATUS_ITEM: &str = "TSCS.EL";

/// The three-phase mask-alignment session.
pub struct CalibrationSession {
    processor: Arc<FrameProcessor>,
    expected: Vec<ExpectedPosition>,
    phase: CalibrationPhase,
    state: PhaseState,
    phase_frames: [PhaseFrames; 3],
    mosaic: Option<Arc<MosaicImage>>,
    locator: Option<ObjectLocator>,
    fitter: Option<TransformFitter>,
    altitude: f64,
    debug_sink: Option<Arc<dyn DebugSink>>,
    log: Box<dyn LogSink>,
    callbacks: HashMap<CallbackId, AlignmentCallback>,
    next_callback_id: CallbackId,
    results_tx: Sender<WorkerMessage>,
    results_rx: Receiver<WorkerMessage>,
    inflight: Option<WorkerHandle>,
    generation: u64,
}

impl CalibrationSession {
    /// Create a session over a prepared frame processor.
    pub fn new(
        config: &SessionConfig,
        processor: FrameProcessor,
        expected: Vec<ExpectedPosition>,
        log: Box<dyn LogSink>,
    ) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            processor: Arc::new(processor),
            expected,
            phase: CalibrationPhase::Star,
            state: PhaseState::Processing,
            phase_frames: [
                config.star.clone(),
                config.star_hole.clone(),
                config.refined_star_hole.clone(),
            ],
            mosaic: None,
            locator: None,
            fitter: None,
            altitude: f64::NAN,
            debug_sink: None,
            log,
            callbacks: HashMap::new(),
            next_callback_id: 0,
            results_tx,
            results_rx,
            inflight: None,
            generation: 0,
        }
    }

    /// Create a session, loading calibration resources from the config paths.
    pub fn from_config(
        config: &SessionConfig,
        expected: Vec<ExpectedPosition>,
        log: Box<dyn LogSink>,
    ) -> Result<Self, PhaseError> {
        let processor = FrameProcessor::from_resources(
            &config.coefficients_path,
            config.bad_pixel_paths.as_ref(),
        )?;
        Ok(Self::new(config, processor, expected, log))
    }

    /// Register a callback for session events.
    pub fn register_callback<F>(&mut self, callback: F) -> CallbackId
    where
        F: Fn(&AlignmentEvent) + Send + Sync + 'static,
    {
        let id = self.next_callback_id;
        self.next_callback_id += 1;
        self.callbacks.insert(id, Arc::new(callback));
        id
    }

    /// Deregister a callback.
    pub fn deregister_callback(&mut self, id: CallbackId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    fn emit(&self, event: &AlignmentEvent) {
        for callback in self.callbacks.values() {
            callback(event);
        }
    }

    /// Current phase.
    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Current phase substate.
    pub fn state(&self) -> &PhaseState {
        &self.state
    }

    /// Mask-frame parameter the current phase will process.
    pub fn frame_base(&self) -> u32 {
        self.phase_frames[self.phase.index()].frame_base
    }

    /// Override the current phase's mask-frame parameter.
    pub fn set_frame_base(&mut self, frame_base: u32) {
        self.phase_frames[self.phase.index()].frame_base = frame_base;
    }

    /// The phase mosaic, once processing has succeeded.
    pub fn mosaic(&self) -> Option<&MosaicImage> {
        self.mosaic.as_deref()
    }

    /// Measurements for the current phase, once located.
    pub fn measures(&self) -> Option<&[shared::image_proc::CentroidMeasure]> {
        self.locator.as_ref().map(|l| l.measures())
    }

    /// The current fit, if one has been computed this phase.
    pub fn fitter(&self) -> Option<&TransformFitter> {
        self.fitter.as_ref()
    }

    /// The current transform, if a fit exists.
    pub fn transform(&self) -> Option<RigidTransform> {
        self.fitter.as_ref().map(|f| f.fit().transform)
    }

    /// Manually enter the telescope altitude (degrees); used when the status
    /// service reports unknown.
    pub fn set_altitude(&mut self, altitude: f64) {
        self.altitude = altitude;
    }

    /// Install a best-effort sink for intermediate pipeline arrays.
    pub fn set_debug_sink(&mut self, sink: Option<Arc<dyn DebugSink>>) {
        self.debug_sink = sink;
    }

    /// Start (or restart) frame processing for the current phase.
    ///
    /// Honors the phase's reuse flag when a mosaic already exists. A request
    /// issued while a worker is in flight cancels it and supersedes its
    /// result. Missing frames fail the phase.
    pub fn request_process(
        &mut self,
        source: &dyn ImageSource,
        status: Option<&dyn StatusService>,
    ) {
        if matches!(self.state, PhaseState::Done | PhaseState::Failed { .. }) {
            log::warn!("process request ignored in state {:?}", self.state);
            return;
        }

        let frames = self.phase_frames[self.phase.index()].clone();

        if frames.reuse_mosaic && self.mosaic.is_some() {
            log::info!("{}: reusing existing mosaic", self.phase.label());
            self.state = PhaseState::Locating;
            self.emit(&AlignmentEvent::MosaicReady {
                phase: self.phase,
                frame_base: frames.frame_base,
            });
            return;
        }

        if let Some(service) = status {
            let altitude = scalar_or_unknown(service, ALTITUDE_STATUS_ITEM);
            if !altitude.is_nan() {
                self.altitude = altitude;
            }
        }

        let mut pair = match source.load_frame_pair(frames.frame_base) {
            Ok(pair) => pair,
            Err(e) => {
                self.fail_phase(PhaseError::Resource {
                    path: e.to_string(),
                });
                return;
            }
        };
        pair.altitude = self.altitude;

        let background: Option<RawFramePair> = match frames.background_base {
            Some(base) => match source.load_frame_pair(base) {
                Ok(bg) => Some(bg),
                Err(e) => {
                    self.fail_phase(PhaseError::Resource {
                        path: e.to_string(),
                    });
                    return;
                }
            },
            None => None,
        };

        self.state = PhaseState::Processing;
        let processor = Arc::clone(&self.processor);
        let debug_sink = self.debug_sink.clone();
        self.spawn(move |cancel| {
            WorkerReply::Mosaic(processor.process(
                &pair,
                background.as_ref(),
                cancel,
                debug_sink.as_deref(),
            ))
        });
    }

    /// Start a full locate pass from the operator-designated anchor.
    ///
    /// Valid once a mosaic exists; re-running during review keeps each
    /// object's drag history and skip flags.
    pub fn request_locate(&mut self, anchor_xy: (f64, f64)) {
        let mosaic = match (&self.state, &self.mosaic) {
            (PhaseState::Locating | PhaseState::Reviewing, Some(mosaic)) => Arc::clone(mosaic),
            _ => {
                log::warn!("locate request ignored in state {:?}", self.state);
                return;
            }
        };

        let locator = match self.locator.take() {
            Some(mut locator) => {
                locator.set_anchor(anchor_xy);
                locator
            }
            None => ObjectLocator::new(self.expected.clone(), anchor_xy),
        };
        let snapshot = locator.clone();
        self.locator = Some(locator);

        self.state = PhaseState::Locating;
        self.spawn(move |cancel| {
            WorkerReply::Centroids(snapshot.locate_all(&mosaic.data.view(), cancel))
        });
    }

    /// Append a drag to an object's history (review correction).
    pub fn add_mask(&mut self, index: usize, drag: DragMask) -> Result<(), LocatorError> {
        self.with_locator(|locator| locator.add_mask(index, drag))
    }

    /// Undo the most recent drag on an object's history.
    pub fn undo_mask(&mut self, index: usize) -> Result<bool, LocatorError> {
        self.with_locator(|locator| locator.undo(index))
    }

    /// Re-apply the most recently undone drag on an object's history.
    pub fn redo_mask(&mut self, index: usize) -> Result<bool, LocatorError> {
        self.with_locator(|locator| locator.redo(index))
    }

    /// Force an object to the unresolved sentinel (forbidden for the anchor).
    pub fn skip_object(&mut self, index: usize) -> Result<(), LocatorError> {
        let phase = self.phase;
        let result = self.with_locator(|locator| locator.skip(index));
        if result.is_ok() {
            self.emit(&AlignmentEvent::ObjectMeasured {
                phase,
                index,
                measure: shared::image_proc::CentroidMeasure::unresolved(),
                resolved: false,
            });
        }
        result
    }

    /// Re-measure a single object after mask edits.
    pub fn request_relocate(&mut self, index: usize) {
        let (snapshot, mosaic) = match (&self.state, &self.locator, &self.mosaic) {
            (PhaseState::Reviewing, Some(locator), Some(mosaic)) => {
                (locator.clone(), Arc::clone(mosaic))
            }
            _ => {
                log::warn!("relocate request ignored in state {:?}", self.state);
                return;
            }
        };

        self.spawn(move |cancel| {
            match snapshot.relocate(&mosaic.data.view(), index, cancel) {
                Ok(outcome) => WorkerReply::Recentroid { index, outcome },
                Err(e) => WorkerReply::Failed(PhaseError::Worker(e.to_string())),
            }
        });
    }

    /// Accept the reviewed measurements and fit the rigid offset.
    ///
    /// Pairs exist only where both the reference and the measurement are
    /// finite; the fit worker prunes outliers automatically.
    pub fn accept_review(&mut self) {
        let locator = match (&self.state, &self.locator) {
            (PhaseState::Reviewing, Some(locator)) => locator,
            _ => {
                log::warn!("fit request ignored in state {:?}", self.state);
                return;
            }
        };

        let references = locator.reference_positions();
        let measures = locator.measures().to_vec();
        self.state = PhaseState::Fitting;

        self.spawn(move |_cancel| {
            let pairs: Vec<CorrespondencePair> = references
                .iter()
                .zip(measures.iter())
                .filter(|(_, m)| !m.is_unresolved())
                .map(|(&(rx, ry), m)| CorrespondencePair::new(rx, ry, m.x, m.y))
                .collect();

            let mut fitter = TransformFitter::new(pairs);
            fitter.outlier_prune(OUTLIER_RESIDUAL_PX);
            WorkerReply::Fit(Box::new(fitter))
        });
    }

    /// Toggle a correspondence pair during fitting; refits immediately.
    pub fn set_pair_active(&mut self, index: usize, active: bool) {
        if !matches!(self.state, PhaseState::Fitting) {
            log::warn!("pair toggle ignored in state {:?}", self.state);
            return;
        }
        if let Some(fitter) = self.fitter.as_mut() {
            fitter.set_active(index, active);
            self.emit_fit_updated();
        }
    }

    /// Accept the fit: append the offset record and finish the phase.
    pub fn accept_fit(&mut self) {
        if !matches!(self.state, PhaseState::Fitting) {
            log::warn!("fit acceptance ignored in state {:?}", self.state);
            return;
        }
        let fit = match self.fitter.as_ref().map(|f| f.fit().clone()) {
            Some(fit) if !fit.degenerate => fit,
            _ => {
                log::warn!("no usable fit to accept; staying in Fitting");
                return;
            }
        };

        let record = format_phase_record(self.phase.label(), &fit.transform, chrono::Local::now());
        self.log.append(&record);
        log::info!(
            "{}: dx={:+.3} dy={:+.3} rotate={:+.4} deg",
            self.phase.label(),
            fit.transform.dx,
            fit.transform.dy,
            fit.transform.theta_degrees()
        );

        self.emit(&AlignmentEvent::PhaseCompleted {
            phase: self.phase,
            transform: fit.transform,
        });
        self.state = PhaseState::Done;
    }

    /// Move to the next phase, advancing its mask-frame parameter.
    ///
    /// Valid only from Done. The phase's mosaic, measurements, and fit are
    /// discarded; the next phase's frame parameter becomes this phase's frame
    /// plus the fixed step.
    pub fn advance_phase(&mut self) {
        if !matches!(self.state, PhaseState::Done) {
            log::warn!("phase advance ignored in state {:?}", self.state);
            return;
        }

        let current_frame = self.frame_base();
        let next = self.phase.next();
        self.phase_frames[next.index()].frame_base = current_frame + MASK_FRAME_STEP;

        log::info!(
            "advancing {} -> {} (mask frame {})",
            self.phase.label(),
            next.label(),
            self.phase_frames[next.index()].frame_base
        );

        self.phase = next;
        self.state = PhaseState::Processing;
        self.mosaic = None;
        self.locator = None;
        self.fitter = None;
    }

    /// Manual retry after a failure; the phase restarts at Processing.
    pub fn retry(&mut self) {
        if !matches!(self.state, PhaseState::Failed { .. }) {
            log::warn!("retry ignored in state {:?}", self.state);
            return;
        }
        self.state = PhaseState::Processing;
    }

    /// Explicit operator cancellation of the in-flight worker, if any.
    pub fn cancel(&mut self) {
        if let Some(worker) = &self.inflight {
            worker.cancel();
        }
    }

    /// Apply any completed worker results without blocking.
    pub fn poll(&mut self) {
        while let Ok(message) = self.results_rx.try_recv() {
            self.apply(message);
        }
    }

    /// Block until a current-generation result is applied or the timeout
    /// elapses. Stale results are drained and dropped along the way.
    pub fn wait_result(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return false,
            };
            match self.results_rx.recv_timeout(remaining) {
                Ok(message) => {
                    let current = message.generation == self.generation;
                    self.apply(message);
                    if current {
                        return true;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce(&shared::cancel::CancelFlag) -> WorkerReply + Send + 'static,
    {
        // Supersede: cancel whatever is still in flight, then outbid it
        if let Some(worker) = self.inflight.take() {
            worker.cancel();
        }
        self.generation += 1;
        let handle: WorkerHandle = spawn_worker(self.generation, self.results_tx.clone(), job);
        self.inflight = Some(handle);
    }

    fn apply(&mut self, message: WorkerMessage) {
        if message.generation != self.generation {
            log::debug!(
                "dropping stale worker result (generation {} != {})",
                message.generation,
                self.generation
            );
            return;
        }
        self.inflight = None;

        match message.reply {
            WorkerReply::Mosaic(Ok(ProcessOutcome::Mosaic(mosaic))) => {
                let frame_base = mosaic.header.frame_base;
                self.mosaic = Some(Arc::new(mosaic));
                self.state = PhaseState::Locating;
                self.emit(&AlignmentEvent::MosaicReady {
                    phase: self.phase,
                    frame_base,
                });
            }
            WorkerReply::Mosaic(Ok(ProcessOutcome::Interrupted)) => {
                log::info!("frame processing interrupted by operator");
            }
            WorkerReply::Mosaic(Err(e)) => self.fail_phase(e),
            WorkerReply::Centroids(LocateAllOutcome::Measured(measures)) => {
                let anchor_unresolved = measures
                    .first()
                    .map(|m| m.is_unresolved())
                    .unwrap_or(true);
                if let Some(locator) = self.locator.as_mut() {
                    locator.apply_measures(measures.clone());
                }
                for (index, measure) in measures.iter().enumerate() {
                    self.emit(&AlignmentEvent::ObjectMeasured {
                        phase: self.phase,
                        index,
                        measure: *measure,
                        resolved: !measure.is_unresolved(),
                    });
                }
                if anchor_unresolved {
                    self.fail_phase(PhaseError::AnchorUnresolved);
                } else {
                    self.state = PhaseState::Reviewing;
                }
            }
            WorkerReply::Centroids(LocateAllOutcome::Interrupted) => {
                log::info!("locate pass interrupted by operator");
            }
            WorkerReply::Recentroid { index, outcome } => {
                if let shared::image_proc::centroid::LocateOutcome::Measured(measure) = outcome {
                    if let Some(locator) = self.locator.as_mut() {
                        locator.apply_measure(index, measure);
                    }
                    self.emit(&AlignmentEvent::ObjectMeasured {
                        phase: self.phase,
                        index,
                        measure,
                        resolved: !measure.is_unresolved(),
                    });
                }
            }
            WorkerReply::Fit(fitter) => {
                self.fitter = Some(*fitter);
                let degenerate = self
                    .fitter
                    .as_ref()
                    .map(|f| f.fit().degenerate)
                    .unwrap_or(true);
                self.emit_fit_updated();
                if degenerate {
                    // Not enough usable pairs; back to corrections
                    log::warn!("degenerate fit; returning to review");
                    self.state = PhaseState::Reviewing;
                }
            }
            WorkerReply::Failed(e) => self.fail_phase(e),
        }
    }

    fn emit_fit_updated(&self) {
        if let Some(fitter) = &self.fitter {
            let fit = fitter.fit();
            self.emit(&AlignmentEvent::FitUpdated {
                phase: self.phase,
                transform: fit.transform,
                residuals: fitter.residuals(),
                degenerate: fit.degenerate,
            });
        }
    }

    fn fail_phase(&mut self, error: PhaseError) {
        log::error!("{}: phase failed: {error}", self.phase.label());
        self.state = PhaseState::Failed {
            reason: error.to_string(),
        };
        self.emit(&AlignmentEvent::PhaseFailed {
            phase: self.phase,
            reason: error.to_string(),
        });
    }

    fn with_locator<T>(
        &mut self,
        op: impl FnOnce(&mut ObjectLocator) -> Result<T, LocatorError>,
    ) -> Result<T, LocatorError> {
        match self.locator.as_mut() {
            Some(locator) => op(locator),
            None => Err(LocatorError::IndexOutOfRange { index: 0, len: 0 }),
        }
    }
}
