//! One-shot background workers.
//!
//! Each worker thread runs exactly one frame-processing, locating, or fitting
//! pass to completion and reports once over the results channel. Replies are
//! tagged with the generation current when the work was issued; the control
//! thread drops replies whose generation is stale, so a superseded worker can
//! finish harmlessly. Workers never call each other and never touch session
//! state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use mes_math::TransformFitter;
use shared::cancel::CancelFlag;
use shared::image_proc::centroid::LocateOutcome;

use crate::error::PhaseError;
use crate::frame_processor::ProcessOutcome;
use crate::locator::LocateAllOutcome;

/// Payload of a completed worker.
pub enum WorkerReply {
    /// Frame pipeline result
    Mosaic(Result<ProcessOutcome, PhaseError>),
    /// Full locate pass result
    Centroids(LocateAllOutcome),
    /// Single-object re-measurement during review
    Recentroid {
        index: usize,
        outcome: LocateOutcome,
    },
    /// Fit (with automatic outlier pruning) over the phase's pairs
    Fit(Box<TransformFitter>),
    /// The worker panicked
    Failed(PhaseError),
}

/// One reply with its issuing generation.
pub struct WorkerMessage {
    /// Generation current when the request was issued
    pub generation: u64,
    /// The payload
    pub reply: WorkerReply,
}

/// Handle to an in-flight worker.
pub struct WorkerHandle {
    /// Generation the worker's reply will carry
    pub generation: u64,
    /// Flag the worker polls at coarse boundaries
    pub cancel: CancelFlag,
    _thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request cooperative cancellation of this worker.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Spawn a one-shot worker.
///
/// The job receives the cancel flag and must poll it at its own coarse
/// boundaries. A panic inside the job is caught and reported as a
/// `Failed` reply rather than escaping the thread.
pub fn spawn_worker<F>(
    generation: u64,
    sender: Sender<WorkerMessage>,
    job: F,
) -> WorkerHandle
where
    F: FnOnce(&CancelFlag) -> WorkerReply + Send + 'static,
{
    let cancel = CancelFlag::new();
    let worker_cancel = cancel.clone();

    let thread = std::thread::spawn(move || {
        info!(generation, "worker started");

        let reply = match catch_unwind(AssertUnwindSafe(|| job(&worker_cancel))) {
            Ok(reply) => reply,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(generation, %message, "worker panicked");
                WorkerReply::Failed(PhaseError::Worker(message))
            }
        };

        if sender.send(WorkerMessage { generation, reply }).is_err() {
            debug!(generation, "result receiver dropped before completion");
        }
    });

    WorkerHandle {
        generation,
        cancel,
        _thread: thread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    #[test]
    fn test_reply_carries_generation() {
        let (tx, rx) = unbounded();
        let _handle = spawn_worker(7, tx, |_cancel| {
            WorkerReply::Centroids(LocateAllOutcome::Interrupted)
        });

        let message = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(message.generation, 7);
    }

    #[test]
    fn test_panic_is_reported_not_propagated() {
        let (tx, rx) = unbounded();
        let _handle = spawn_worker(1, tx, |_cancel| -> WorkerReply {
            panic!("synthetic failure");
        });

        let message = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match message.reply {
            WorkerReply::Failed(PhaseError::Worker(m)) => {
                assert!(m.contains("synthetic failure"));
            }
            _ => panic!("expected a Failed reply"),
        }
    }

    #[test]
    fn test_cancel_reaches_the_job() {
        let (tx, rx) = unbounded();
        let handle = spawn_worker(2, tx, |cancel| {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            WorkerReply::Centroids(LocateAllOutcome::Interrupted)
        });

        handle.cancel();
        let message = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            message.reply,
            WorkerReply::Centroids(LocateAllOutcome::Interrupted)
        ));
    }
}
