use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::app::controller::TerminationReason;
use crate::intake::OpenProgress;
use crate::pipeline::{AnalysisSession, AnalysisStatus, LiveState};

/// Presentation-side hooks. Called on the controller task, so implementations
/// must return quickly.
pub trait SessionObserver: Send + Sync {
    fn on_live_update(&mut self, live: &LiveState);
    fn on_analysis_state_change(&mut self, session: &AnalysisSession);
    fn on_terminated(&mut self, reason: &TerminationReason);

    fn on_progress(&mut self, _progress: &OpenProgress) {}
}

/// Named fan-out over several observers, notified in insertion order.
#[derive(Default)]
pub struct ObserverSet {
    observers: IndexMap<String, Box<dyn SessionObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, observer: Box<dyn SessionObserver>) -> Self {
        self.insert(name, observer);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, observer: Box<dyn SessionObserver>) {
        self.observers.insert(name.into(), observer);
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn SessionObserver>> {
        self.observers.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.observers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl SessionObserver for ObserverSet {
    fn on_live_update(&mut self, live: &LiveState) {
        for observer in self.observers.values_mut() {
            observer.on_live_update(live);
        }
    }

    fn on_analysis_state_change(&mut self, session: &AnalysisSession) {
        for observer in self.observers.values_mut() {
            observer.on_analysis_state_change(session);
        }
    }

    fn on_terminated(&mut self, reason: &TerminationReason) {
        for observer in self.observers.values_mut() {
            observer.on_terminated(reason);
        }
    }

    fn on_progress(&mut self, progress: &OpenProgress) {
        for observer in self.observers.values_mut() {
            observer.on_progress(progress);
        }
    }
}

/// Observer callbacks as values, for consumers that live on another task.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Progress(OpenProgress),
    LiveUpdate(LiveState),
    AnalysisChanged(AnalysisSession),
    Terminated(TerminationReason),
}

pub type SessionEvents = UnboundedReceiverStream<SessionEvent>;

/// Forwards every callback into a stream. Events are dropped once the
/// stream is gone.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
    live_updates: bool,
}

impl ChannelObserver {
    pub fn new() -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                live_updates: true,
            },
            UnboundedReceiverStream::new(rx),
        )
    }

    /// Skip per-cycle live updates; for consumers that only care about analyses.
    pub fn without_live_updates(mut self) -> Self {
        self.live_updates = false;
        self
    }

    fn forward(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("Session event stream closed, dropping event");
        }
    }
}

impl SessionObserver for ChannelObserver {
    fn on_live_update(&mut self, live: &LiveState) {
        if self.live_updates {
            self.forward(SessionEvent::LiveUpdate(live.clone()));
        }
    }

    fn on_analysis_state_change(&mut self, session: &AnalysisSession) {
        self.forward(SessionEvent::AnalysisChanged(session.clone()));
    }

    fn on_terminated(&mut self, reason: &TerminationReason) {
        self.forward(SessionEvent::Terminated(reason.clone()));
    }

    fn on_progress(&mut self, progress: &OpenProgress) {
        self.forward(SessionEvent::Progress(progress.clone()));
    }
}

/// Writes every event to the log.
#[derive(Default)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_live_update(&mut self, live: &LiveState) {
        debug!(
            "Live update #{}: {} objects",
            live.sequence(),
            live.detections().len()
        );
    }

    fn on_analysis_state_change(&mut self, session: &AnalysisSession) {
        match session.status() {
            AnalysisStatus::Completed => info!(
                "Analysis {} completed ({} chars)",
                session.generation(),
                session.result().map(|r| r.text().len()).unwrap_or(0)
            ),
            AnalysisStatus::Failed => warn!(
                "Analysis {} failed: {}",
                session.generation(),
                session.result().map(|r| r.text()).unwrap_or_default()
            ),
            status => info!("Analysis {} is {:?}", session.generation(), status),
        }
    }

    fn on_terminated(&mut self, reason: &TerminationReason) {
        match reason {
            TerminationReason::EndOfStream => info!("Session ended: stream finished"),
            TerminationReason::Connectivity(err) => warn!("Session ended: {}", err),
        }
    }

    fn on_progress(&mut self, progress: &OpenProgress) {
        info!("[{:>3}%] {}", progress.percent(), progress.message());
    }
}
