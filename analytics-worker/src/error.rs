use thiserror::Error;

/// Errors that can stop the worker loop itself (as opposed to a single
/// batch, which is abandoned-and-logged rather than propagated).
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to dequeue batch: {0}")]
    Queue(#[from] analytics_queue::QueueError),
}
