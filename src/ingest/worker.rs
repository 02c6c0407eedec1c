//! Runs a pipeline on its own thread and forwards its events over a channel.

use crate::ingest::{IngestEvent, IngestionPipeline};
use crate::source::RecordSource;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Handle to a running ingestion thread. Dropping it cancels the stream.
pub struct IngestHandle {
    generation: u64,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl IngestHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop requesting pages. A fetch already in flight completes but its
    /// result is neither cached nor sent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the thread to exit
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Start `pipeline` on a named background thread.
///
/// Events are sent in pipeline order. The thread exits after the terminal
/// event, on cancellation, or when the receiver is gone. A run that stops
/// early leaves no partial snapshot in the cache.
pub fn spawn<S>(pipeline: IngestionPipeline<S>, events: Sender<IngestEvent>) -> io::Result<IngestHandle>
where
    S: RecordSource + 'static,
{
    let generation = pipeline.generation();
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let pipeline = pipeline.with_cancel_flag(Arc::clone(&cancelled));

    let thread = thread::Builder::new()
        .name(format!("ingest-{}", generation))
        .spawn(move || run(pipeline, &events, &flag))?;

    Ok(IngestHandle {
        generation,
        cancelled,
        thread: Some(thread),
    })
}

fn run<S: RecordSource>(pipeline: IngestionPipeline<S>, events: &Sender<IngestEvent>, cancelled: &AtomicBool) {
    let generation = pipeline.generation();
    for event in pipeline {
        if cancelled.load(Ordering::Acquire) {
            debug!(generation, "Ingestion cancelled");
            return;
        }
        if events.send(event).is_err() {
            debug!(generation, "Event receiver dropped, stopping ingestion");
            return;
        }
    }
}
