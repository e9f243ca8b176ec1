//! Progress reporting and cancellation for the batch engines.
//!
//! Engines push [`ProgressEvent`]s into an mpsc channel; the observer
//! (CLI, tests) drains them independently of the engine's control flow.
//! Cancellation is a shared flag checked between items, so committed
//! items stay committed and counts reported so far remain valid.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};

/// Cooperative cancellation signal shared between a batch engine and
/// its caller.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// One item finished (successfully or not).
    Item { done: usize, total: usize },
    /// The batch ended; `done` may be short of `total` when cancelled.
    Finished { done: usize, total: usize },
}

/// Send side of the progress channel. A default sink drops all events,
/// for callers that do not observe progress.
#[derive(Clone, Default)]
pub struct ProgressSink(Option<Sender<ProgressEvent>>);

impl ProgressSink {
    /// Creates a connected sink/receiver pair.
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = channel();
        (Self(Some(tx)), rx)
    }

    /// A sink that discards events.
    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.0 {
            // A gone observer never stalls the engine.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());

        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn events_flow_through_channel() {
        let (sink, rx) = ProgressSink::channel();
        sink.emit(ProgressEvent::Item { done: 1, total: 2 });
        sink.emit(ProgressEvent::Finished { done: 2, total: 2 });

        assert_eq!(rx.recv().unwrap(), ProgressEvent::Item { done: 1, total: 2 });
        assert_eq!(
            rx.recv().unwrap(),
            ProgressEvent::Finished { done: 2, total: 2 }
        );
    }

    #[test]
    fn disabled_sink_does_not_block() {
        let sink = ProgressSink::disabled();
        sink.emit(ProgressEvent::Item { done: 1, total: 1 });
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.emit(ProgressEvent::Item { done: 1, total: 1 });
    }
}
