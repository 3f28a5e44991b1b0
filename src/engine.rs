use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use tokio::sync::oneshot;

use crate::{
    classifier::{Classifier, Prediction},
    error::ClassifyError,
    normalize::NormalizedImage,
};

type JobReceiver = Arc<Mutex<mpsc::Receiver<InferenceJob>>>;

/// Receiving end of a scheduled inference.
pub type InferenceReply = oneshot::Receiver<Result<InferenceOutput, ClassifyError>>;

/// Jobs that may wait in the queue per worker before new work is refused.
pub const QUEUE_DEPTH_PER_WORKER: usize = 32;

/// Represents the current state of the inference engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No worker is running a classifier call.
    Idle,
    /// At least one worker is running a classifier call.
    Processing,
    /// The engine was stopped and accepts no more work.
    Stopped,
}

impl EngineState {
    /// Returns the state as a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Processing => "processing",
            EngineState::Stopped => "stopped",
        }
    }
}

/// Output of one classifier call, with telemetry.
#[derive(Debug)]
pub struct InferenceOutput {
    /// Identifier assigned when the job was scheduled.
    pub id: u64,
    /// Raw, unvalidated classifier output.
    pub predictions: Vec<Prediction>,
    /// Time spent inside the classifier.
    pub duration: Duration,
}

struct InferenceJob {
    id: u64,
    image: NormalizedImage,
    top_k: usize,
    reply: oneshot::Sender<Result<InferenceOutput, ClassifyError>>,
}

/// Runs classifier calls on a pool of dedicated OS threads.
///
/// Classification is CPU-bound and would stall the async runtime if called
/// from a request handler. The engine keeps those calls on its own threads:
/// jobs go in over a channel and each caller awaits a private oneshot reply.
/// A caller that gives up (for example on a request timeout) just drops its
/// receiver, and the worker discards the result.
///
/// The queue is bounded. When it is full, new jobs are refused with
/// [`ClassifyError::EngineUnavailable`] instead of piling up.
pub struct InferenceEngine<C: Classifier> {
    classifier: Arc<C>,
    busy: Arc<AtomicUsize>,
    req_tx: Option<mpsc::SyncSender<InferenceJob>>,
    workers: Vec<JoinHandle<()>>,
    id_counter: AtomicU64,
}

impl<C: Classifier> InferenceEngine<C> {
    /// Creates a new engine and spawns `workers` threads (at least one).
    ///
    /// The classifier is moved into an `Arc` shared by every worker. Up to
    /// [`QUEUE_DEPTH_PER_WORKER`] jobs per worker may wait in the queue.
    pub fn new(classifier: C, workers: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        Self::with_queue_capacity(classifier, workers, workers * QUEUE_DEPTH_PER_WORKER)
    }

    /// Like [`InferenceEngine::new`], with an explicit queue capacity (at least one).
    pub fn with_queue_capacity(
        classifier: C,
        workers: usize,
        queue_capacity: usize,
    ) -> std::io::Result<Self> {
        let classifier = Arc::new(classifier);
        let (req_tx, req_rx) = mpsc::sync_channel::<InferenceJob>(queue_capacity.max(1));
        let req_rx: JobReceiver = Arc::new(Mutex::new(req_rx));
        let busy = Arc::new(AtomicUsize::new(0));

        let workers = (0..workers.max(1))
            .map(|index| {
                std::thread::Builder::new()
                    .name(format!("inference-{index}"))
                    .spawn({
                        let classifier = classifier.clone();
                        let req_rx = req_rx.clone();
                        let busy = busy.clone();
                        move || worker_loop(index, classifier, req_rx, busy)
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        log::info!(
            "Inference engine started with {} worker(s), queue capacity {}",
            workers.len(),
            queue_capacity.max(1)
        );

        Ok(Self {
            classifier,
            busy,
            req_tx: Some(req_tx),
            workers,
            id_counter: AtomicU64::new(0),
        })
    }

    /// Returns the current state of the engine.
    pub fn state(&self) -> EngineState {
        if self.req_tx.is_none() {
            EngineState::Stopped
        } else if self.busy.load(Ordering::Acquire) == 0 {
            EngineState::Idle
        } else {
            EngineState::Processing
        }
    }

    /// Returns true until [`InferenceEngine::stop`] is called.
    pub fn is_running(&self) -> bool {
        self.req_tx.is_some()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The classifier shared by the workers.
    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Queues `image` for a worker without waiting for the result.
    ///
    /// Fails with [`ClassifyError::EngineUnavailable`] when the engine is
    /// stopped or the queue is full.
    pub fn schedule(&self, image: NormalizedImage, top_k: usize) -> Result<InferenceReply, ClassifyError> {
        let tx = self.req_tx.as_ref().ok_or(ClassifyError::EngineUnavailable)?;
        let (reply, reply_rx) = oneshot::channel();
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);

        match tx.try_send(InferenceJob {
            id,
            image,
            top_k,
            reply,
        }) {
            Ok(()) => {
                log::debug!("Scheduled inference {id}");
                Ok(reply_rx)
            }
            Err(mpsc::TrySendError::Full(_)) => {
                log::warn!("Inference queue full, refusing inference {id}");
                Err(ClassifyError::EngineUnavailable)
            }
            Err(mpsc::TrySendError::Disconnected(_)) => Err(ClassifyError::EngineUnavailable),
        }
    }

    /// Schedules `image` on a worker and waits for the classifier output.
    ///
    /// Classifier errors and panics come back as
    /// [`ClassifyError::Classification`]. If the workers are gone or the queue
    /// is full the result is [`ClassifyError::EngineUnavailable`].
    pub async fn infer(
        &self,
        image: NormalizedImage,
        top_k: usize,
    ) -> Result<InferenceOutput, ClassifyError> {
        self.schedule(image, top_k)?
            .await
            .map_err(|_| ClassifyError::EngineUnavailable)?
    }

    /// Stops the engine and joins the worker threads.
    ///
    /// Closing the channel lets every worker finish the job it is on and
    /// then exit.
    pub fn stop(&mut self) {
        if self.req_tx.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Inference worker exited with a panic");
            }
        }
        log::info!("Inference engine stopped");
    }
}

impl<C: Classifier> Drop for InferenceEngine<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<C: Classifier>(index: usize, classifier: Arc<C>, req_rx: JobReceiver, busy: Arc<AtomicUsize>) {
    loop {
        let job = {
            let Ok(rx) = req_rx.lock() else {
                log::error!("Inference worker {index}: job queue lock poisoned");
                return;
            };
            match rx.recv() {
                Ok(job) => job,
                Err(_) => return,
            }
        };

        if job.reply.is_closed() {
            log::debug!("Skipping inference {}: caller went away", job.id);
            continue;
        }

        busy.fetch_add(1, Ordering::AcqRel);
        let start_time = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            classifier.predict(&job.image, job.top_k)
        }));
        let duration = start_time.elapsed();
        busy.fetch_sub(1, Ordering::AcqRel);

        let result = match outcome {
            Ok(Ok(predictions)) => {
                log::debug!("Inference {} completed in {:?}", job.id, duration);
                Ok(InferenceOutput {
                    id: job.id,
                    predictions,
                    duration,
                })
            }
            Ok(Err(e)) => {
                log::error!("Inference {} failed: {e}", job.id);
                Err(ClassifyError::Classification(e.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("Inference {} panicked: {message}", job.id);
                Err(ClassifyError::Classification(format!(
                    "classifier panicked: {message}"
                )))
            }
        };

        let _ = job.reply.send(result);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
