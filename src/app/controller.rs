use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::app::observer::{ObserverSet, SessionObserver};
use crate::config::Configuration;
use crate::error::{AnalysisError, AppError, ConnectivityError};
use crate::intake::{FrameRead, FrameSource, OpenProgress, StreamHandle, StreamStats};
use crate::pipeline::{
    AnalysisSession, Completion, CompletionOutcome, DescriberStack, DescriberStackBuilder,
    Detector, LivePublisher, LiveReader, SceneDescriber, SceneRequest,
};

/// Why the session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    EndOfStream,
    Connectivity(ConnectivityError),
}

/// What `SessionController::run` leaves behind.
#[derive(Debug)]
pub struct ControllerReport {
    pub termination: TerminationReason,
    pub session: Option<AnalysisSession>,
    pub stats: Option<StreamStats>,
    pub opens: u32,
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Analyze,
}

/// Cloneable remote for a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    live: LiveReader,
}

impl ControllerHandle {
    /// Requests an analysis of whatever is live when the controller next
    /// looks at its inbox. Returns false once the stream has ended.
    pub fn trigger(&self) -> bool {
        self.commands.send(Command::Analyze).is_ok()
    }

    /// Resolves once the controller stops accepting triggers.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    pub fn live(&self) -> LiveReader {
        self.live.clone()
    }
}

#[derive(Debug, Clone)]
struct ControllerSettings {
    confidence_threshold: f32,
    cycle_yield: Duration,
    retry_delay: Duration,
    drain_timeout: Duration,
    analysis_timeout: Option<Duration>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            cycle_yield: Duration::from_millis(10),
            retry_delay: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            analysis_timeout: None,
        }
    }
}

/// Owns the capture loop, the live state and the analysis session.
///
/// Everything that mutates state runs on the task driving [`run`]; scene
/// descriptions run on spawned tasks and report back over a channel.
///
/// [`run`]: SessionController::run
pub struct SessionController {
    source: FrameSource,
    detector: Arc<dyn Detector>,
    describer: DescriberStack,
    observers: ObserverSet,
    publisher: LivePublisher,
    session: Option<AnalysisSession>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    settings: ControllerSettings,
}

impl SessionController {
    pub async fn run(mut self) -> ControllerReport {
        let observers = &mut self.observers;
        let mut report_progress = |progress: OpenProgress| observers.on_progress(&progress);
        let stream = match self.source.open(&mut report_progress).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Could not open stream: {}", err);
                return self.terminate(TerminationReason::Connectivity(err), None);
            }
        };

        let stats = self.capture_loop(stream).await;
        self.close_inbox();
        self.drain().await;
        self.terminate(TerminationReason::EndOfStream, Some(stats))
    }

    async fn capture_loop(&mut self, mut stream: StreamHandle) -> StreamStats {
        let mut first_frame = true;
        loop {
            match self.serve_while(stream.next_frame()).await {
                FrameRead::Frame(frame) => {
                    if first_frame {
                        first_frame = false;
                        self.observers.on_progress(&OpenProgress::FirstFrame);
                    }
                    let detector = Arc::clone(&self.detector);
                    let threshold = self.settings.confidence_threshold;
                    let detected = self.serve_while(detector.detect(&frame, threshold)).await;
                    match detected {
                        Ok(output) => {
                            let live = self.publisher.publish(frame, output);
                            self.observers.on_live_update(&live);
                        }
                        Err(err) => {
                            warn!(
                                "{} detector failed on frame {}: {}",
                                detector.name(),
                                frame.frame_id(),
                                err
                            );
                        }
                    }
                    self.serve_while(sleep(self.settings.cycle_yield)).await;
                }
                FrameRead::TransientReadFailure(reason) => {
                    warn!(
                        "Frame read failed ({}), retrying in {:?}",
                        reason, self.settings.retry_delay
                    );
                    self.serve_while(sleep(self.settings.retry_delay)).await;
                }
                FrameRead::EndOfStream => break,
            }
        }
        stream.release()
    }

    /// Drives `work` to completion while serving triggers and completions.
    ///
    /// `work` never touches the live state, so a trigger handled here always
    /// captures the last fully published cycle.
    async fn serve_while<F: Future>(&mut self, work: F) -> F::Output {
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                output = &mut work => return output,
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(Command::Analyze) => self.trigger(),
                    None => self.commands_open = false,
                },
                Some(completion) = self.completions.recv() => self.complete(completion),
            }
        }
    }

    fn trigger(&mut self) {
        let Some(live) = self.publisher.current() else {
            debug!("Analysis requested before the first frame, ignoring");
            return;
        };
        let session = self.session.get_or_insert_with(AnalysisSession::new);
        let generation = session.capture(&live);
        info!(
            "Analysis {} captured frame #{} with {} objects",
            generation,
            live.sequence(),
            live.detections().len()
        );
        self.observers.on_analysis_state_change(session);

        if let Some(request) = session.dispatch() {
            self.observers.on_analysis_state_change(session);
            self.dispatch(request);
        }
    }

    fn dispatch(&self, request: SceneRequest) {
        let describer = self.describer.clone();
        let completions = self.completions_tx.clone();
        let generation = request.generation;
        tokio::spawn(async move {
            let result = describer
                .oneshot(request)
                .await
                .map_err(AnalysisError::from_boxed);
            if completions.send(Completion { generation, result }).is_err() {
                debug!("Controller gone before analysis {} finished", generation);
            }
        });
    }

    fn complete(&mut self, completion: Completion) {
        let generation = completion.generation;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.apply(completion) {
            CompletionOutcome::Applied(status) => {
                debug!("Analysis {} finished as {:?}", generation, status);
                self.observers.on_analysis_state_change(session);
            }
            CompletionOutcome::Superseded => {
                debug!(
                    "Discarding analysis {}, session is at {}",
                    generation,
                    session.generation()
                );
            }
        }
    }

    // No new captures once the stream is gone.
    fn close_inbox(&mut self) {
        self.commands.close();
        self.commands_open = false;
        while let Ok(Command::Analyze) = self.commands.try_recv() {
            debug!("Stream has ended, dropping analysis request");
        }
    }

    /// Gives a pending analysis a bounded chance to land after the stream ends.
    async fn drain(&mut self) {
        if !self.session.as_ref().is_some_and(AnalysisSession::is_pending) {
            return;
        }
        info!(
            "Waiting up to {:?} for the pending analysis",
            self.settings.drain_timeout
        );
        let waited = timeout(self.settings.drain_timeout, async {
            while let Some(completion) = self.completions.recv().await {
                self.complete(completion);
                if !self.session.as_ref().is_some_and(AnalysisSession::is_pending) {
                    break;
                }
            }
        })
        .await;
        if waited.is_err() {
            warn!("Pending analysis did not finish before shutdown");
        }
    }

    fn terminate(
        mut self,
        termination: TerminationReason,
        stats: Option<StreamStats>,
    ) -> ControllerReport {
        self.observers.on_terminated(&termination);
        ControllerReport {
            termination,
            session: self.session,
            stats,
            opens: self.source.opens(),
        }
    }
}

pub struct SessionControllerBuilder {
    source: FrameSource,
    detector: Arc<dyn Detector>,
    describer: Arc<dyn SceneDescriber>,
    observers: ObserverSet,
    settings: ControllerSettings,
}

impl SessionControllerBuilder {
    pub fn new(
        source: FrameSource,
        detector: Arc<dyn Detector>,
        describer: Arc<dyn SceneDescriber>,
    ) -> Self {
        Self {
            source,
            detector,
            describer,
            observers: ObserverSet::new(),
            settings: ControllerSettings::default(),
        }
    }

    // Takes every loop and analysis setting from the loaded configuration.
    pub fn configuration(mut self, configuration: &Configuration) -> Self {
        self.settings = ControllerSettings {
            confidence_threshold: configuration.detector.confidence_threshold,
            cycle_yield: configuration.stream.cycle_yield(),
            retry_delay: configuration.stream.retry_delay(),
            drain_timeout: configuration.analysis.drain_timeout(),
            analysis_timeout: configuration.analysis.request_timeout(),
        };
        self
    }

    pub fn confidence_threshold(mut self, confidence_threshold: f32) -> Self {
        self.settings.confidence_threshold = confidence_threshold;
        self
    }

    pub fn cycle_yield(mut self, cycle_yield: Duration) -> Self {
        self.settings.cycle_yield = cycle_yield;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.settings.retry_delay = retry_delay;
        self
    }

    pub fn drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.settings.drain_timeout = drain_timeout;
        self
    }

    // None leaves scene-description calls unbounded.
    pub fn analysis_timeout(mut self, analysis_timeout: Option<Duration>) -> Self {
        self.settings.analysis_timeout = analysis_timeout;
        self
    }

    pub fn observer(mut self, name: impl Into<String>, observer: Box<dyn SessionObserver>) -> Self {
        self.observers.insert(name, observer);
        self
    }

    pub fn build(self) -> Result<(SessionController, ControllerHandle), AppError> {
        if !(0.0..=1.0).contains(&self.settings.confidence_threshold) {
            return Err(AppError::Config(config::ConfigError::Message(format!(
                "confidence threshold {} is outside [0, 1]",
                self.settings.confidence_threshold
            ))));
        }

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let publisher = LivePublisher::new();
        let handle = ControllerHandle {
            commands: commands_tx,
            live: publisher.subscribe(),
        };
        let describer = DescriberStackBuilder::new(self.describer)
            .timeout(self.settings.analysis_timeout)
            .build();

        info!(
            "Session controller ready: detector={}, observers={}",
            self.detector.name(),
            self.observers.len()
        );

        let controller = SessionController {
            source: self.source,
            detector: self.detector,
            describer,
            observers: self.observers,
            publisher,
            session: None,
            commands,
            commands_open: true,
            completions_tx,
            completions,
            settings: self.settings,
        };
        Ok((controller, handle))
    }
}
