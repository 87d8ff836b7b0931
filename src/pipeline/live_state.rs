use std::sync::Arc;
use tokio::sync::watch;

use crate::common::{DetectionSet, Frame};
use crate::pipeline::detector::DetectionOutput;

/// The newest cycle's output. Raw frame, annotated frame and detections
/// always come from the same cycle.
#[derive(Debug, Clone)]
pub struct LiveState {
    raw: Frame,
    annotated: Frame,
    detections: DetectionSet,
    sequence: u64,
}

impl LiveState {
    fn new(sequence: u64, raw: Frame, output: DetectionOutput) -> Self {
        Self {
            raw,
            annotated: output.annotated,
            detections: output.detections,
            sequence,
        }
    }

    pub fn raw(&self) -> &Frame {
        &self.raw
    }

    pub fn annotated(&self) -> &Frame {
        &self.annotated
    }

    pub fn detections(&self) -> &DetectionSet {
        &self.detections
    }

    pub fn labels(&self) -> Vec<String> {
        self.detections.labels()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Single writer of the live state. Each publish swaps in a whole instance.
pub struct LivePublisher {
    tx: watch::Sender<Option<Arc<LiveState>>>,
    sequence: u64,
}

impl LivePublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx, sequence: 0 }
    }

    pub fn publish(&mut self, raw: Frame, output: DetectionOutput) -> Arc<LiveState> {
        self.sequence += 1;
        let state = Arc::new(LiveState::new(self.sequence, raw, output));
        self.tx.send_replace(Some(state.clone()));
        state
    }

    pub fn current(&self) -> Option<Arc<LiveState>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> LiveReader {
        LiveReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for LivePublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the live state, for displays that poll rather than observe.
#[derive(Clone)]
pub struct LiveReader {
    rx: watch::Receiver<Option<Arc<LiveState>>>,
}

impl LiveReader {
    pub fn latest(&self) -> Option<Arc<LiveState>> {
        self.rx.borrow().clone()
    }

    /// Waits for the next publish. Returns `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<Arc<LiveState>> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}
