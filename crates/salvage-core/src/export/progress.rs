//! One-way, best-effort progress reporting.
//!
//! The engine never waits for a consumer: sinks must return promptly
//! and a gone receiver is silently ignored.

/// Emitted once per visited entry.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// `saved / total * 100`, integer-truncated.
    pub percent: u8,
    /// `"<saved>/<total>: <name>"`.
    pub message: String,
}

/// Receives progress events from the export worker.
pub trait ProgressSink: Send {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Fire-and-forget delivery into a channel; a dropped receiver never
/// stalls the worker.
impl ProgressSink for std::sync::mpsc::Sender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}
