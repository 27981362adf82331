//! Progress bookkeeping for one session

use super::bus::ProgressSink;
use super::events::{ProgressEvent, Stage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use terrawatch_core::Error;
use tracing::{debug, error};

/// Emits a session's events and guarantees a single terminal event
pub struct ProgressReporter {
    session_id: String,
    sink: Arc<dyn ProgressSink>,
    terminated: AtomicBool,
}

impl ProgressReporter {
    pub fn new(session_id: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            session_id: session_id.into(),
            sink,
            terminated: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn emit(&self, event: ProgressEvent) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        debug!(
            session_id = %self.session_id,
            stage = %event.stage,
            progress = event.progress,
            "{}",
            event.message
        );
        self.sink.publish(event);
    }

    /// Open a stage; progress within it never decreases
    pub fn stage(&self, stage: Stage) -> StageReporter<'_> {
        StageReporter {
            reporter: self,
            stage,
            last: 0,
            closed: false,
        }
    }

    /// The `complete` event; nothing is emitted after it
    pub fn complete(&self, message: &str, data: serde_json::Value) {
        self.emit(ProgressEvent::new(&self.session_id, Stage::Complete, 100, message).with_data(data));
        self.terminated.store(true, Ordering::Release);
    }

    /// The single `error` event; later calls and events are dropped
    pub fn fail(&self, err: &Error) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let message = err.to_string();
        error!(session_id = %self.session_id, error = %message, "session failed");
        self.sink.publish(
            ProgressEvent::new(&self.session_id, Stage::Error, 0, message.clone())
                .with_data(serde_json::json!({ "message": message })),
        );
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

/// Progress within one stage: clamped to be non-decreasing and closed at 100
pub struct StageReporter<'a> {
    reporter: &'a ProgressReporter,
    stage: Stage,
    last: u8,
    closed: bool,
}

impl StageReporter<'_> {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn report(&mut self, progress: u8, message: impl Into<String>) {
        self.send(progress, message.into(), None);
    }

    pub fn report_with(&mut self, progress: u8, message: impl Into<String>, data: serde_json::Value) {
        self.send(progress, message.into(), Some(data));
    }

    fn send(&mut self, progress: u8, message: String, data: Option<serde_json::Value>) {
        if self.closed {
            return;
        }
        let progress = progress.min(100).max(self.last);
        self.last = progress;
        self.closed = progress == 100;

        let mut event = ProgressEvent::new(self.reporter.session_id(), self.stage, progress, message);
        event.data = data;
        self.reporter.emit(event);
    }

    /// Close the stage with a 100 event unless one was already sent
    pub fn finish(mut self, message: impl Into<String>) {
        self.send(100, message.into(), None);
    }

    pub fn finish_with(mut self, message: impl Into<String>, data: serde_json::Value) {
        self.send(100, message.into(), Some(data));
    }
}
