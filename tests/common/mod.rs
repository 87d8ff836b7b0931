#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use cctv_insight::app::{
    ChannelObserver, ControllerHandle, ControllerReport, SessionControllerBuilder, SessionEvent,
};
use cctv_insight::common::{BoundingBox, Detection, DetectionSet, Frame, PixelFormat, Resolution};
use cctv_insight::error::{AnalysisError, ConnectivityError, DetectorError};
use cctv_insight::intake::{
    BackendRead, FrameSource, StaticLocator, StreamBackend, StreamLocator, StreamOpener,
};
use cctv_insight::pipeline::annotate::annotate;
use cctv_insight::pipeline::{
    AnalysisSession, AnalysisStatus, DetectionOutput, Detector, LiveState, SceneDescriber,
};

pub const SCRIPTED_URL: &str = "scripted://camera-1";

/// Frames are solid fills; the fill value identifies the frame.
pub fn marker_frame(marker: u8) -> Frame {
    Frame::filled(Resolution::CANONICAL, [marker; 3], PixelFormat::Bgr)
}

pub fn marker_of(frame: &Frame) -> u8 {
    frame.pixels().get_pixel(0, 0)[0]
}

pub fn marker_label(marker: u8) -> String {
    format!("marker-{}", marker)
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// Test-side end of a scripted stream. Dropping it ends the stream.
pub struct ScriptedFeed {
    tx: mpsc::UnboundedSender<BackendRead>,
}

impl ScriptedFeed {
    pub fn frame(&self, marker: u8) {
        self.tx
            .send(BackendRead::Frame(marker_frame(marker)))
            .expect("controller dropped the stream");
    }

    pub fn stall(&self, reason: &str) {
        self.tx
            .send(BackendRead::Unavailable(reason.to_string()))
            .expect("controller dropped the stream");
    }
}

struct ScriptedBackend {
    rx: mpsc::UnboundedReceiver<BackendRead>,
}

#[async_trait]
impl StreamBackend for ScriptedBackend {
    async fn read(&mut self) -> BackendRead {
        self.rx.recv().await.unwrap_or(BackendRead::EndOfStream)
    }
}

pub struct ScriptedOpener {
    rx: Mutex<Option<mpsc::UnboundedReceiver<BackendRead>>>,
    opens: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamOpener for ScriptedOpener {
    fn accepts(&self, url: &str) -> bool {
        url.starts_with("scripted://")
    }

    async fn open(&self, url: &str) -> Result<Box<dyn StreamBackend>, ConnectivityError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ConnectivityError::Open {
                url: url.to_string(),
                reason: "scripted stream already opened".to_string(),
            })?;
        Ok(Box::new(ScriptedBackend { rx }))
    }
}

pub fn scripted_source(
    locator: Box<dyn StreamLocator>,
) -> (FrameSource, ScriptedFeed, Arc<AtomicUsize>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let opens = Arc::new(AtomicUsize::new(0));
    let opener = ScriptedOpener {
        rx: Mutex::new(Some(rx)),
        opens: opens.clone(),
    };
    let source = FrameSource::new(locator, Resolution::CANONICAL).with_opener(Box::new(opener));
    (source, ScriptedFeed { tx }, opens)
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Reports one detection whose label names the frame's marker.
#[derive(Default)]
pub struct MarkerDetector {
    fail_on: Option<u8>,
    calls: Arc<AtomicUsize>,
}

impl MarkerDetector {
    pub fn failing_on(marker: u8) -> Self {
        Self {
            fail_on: Some(marker),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Detector for MarkerDetector {
    fn name(&self) -> &'static str {
        "marker"
    }

    async fn detect(
        &self,
        frame: &Frame,
        _confidence_threshold: f32,
    ) -> Result<DetectionOutput, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let marker = marker_of(frame);
        if self.fail_on == Some(marker) {
            return Err(DetectorError::Inference(format!("bad frame {}", marker)));
        }
        let detections = DetectionSet::new(vec![Detection::new(
            marker_label(marker),
            0.9,
            BoundingBox::new(100.0, 100.0, 200.0, 200.0),
        )]);
        Ok(DetectionOutput {
            annotated: annotate(frame, &detections),
            detections,
        })
    }
}

// ---------------------------------------------------------------------------
// Describers
// ---------------------------------------------------------------------------

pub struct FixedDescriber {
    text: String,
}

impl FixedDescriber {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

#[async_trait]
impl SceneDescriber for FixedDescriber {
    async fn describe(&self, _image: &Frame, _labels: &[String]) -> Result<String, AnalysisError> {
        Ok(self.text.clone())
    }
}

/// One in-flight describe call, answered whenever the test decides.
pub struct DescribeCall {
    pub image: Frame,
    pub labels: Vec<String>,
    reply: oneshot::Sender<Result<String, AnalysisError>>,
}

impl DescribeCall {
    pub fn reply(self, result: Result<String, AnalysisError>) {
        let _ = self.reply.send(result);
    }
}

pub struct GatedDescriber {
    calls: mpsc::UnboundedSender<DescribeCall>,
}

pub fn gated_describer() -> (Arc<GatedDescriber>, mpsc::UnboundedReceiver<DescribeCall>) {
    let (calls, rx) = mpsc::unbounded_channel();
    (Arc::new(GatedDescriber { calls }), rx)
}

#[async_trait]
impl SceneDescriber for GatedDescriber {
    async fn describe(&self, image: &Frame, labels: &[String]) -> Result<String, AnalysisError> {
        let (reply, answer) = oneshot::channel();
        let call = DescribeCall {
            image: image.clone(),
            labels: labels.to_vec(),
            reply,
        };
        if self.calls.send(call).is_err() {
            return Err(AnalysisError::Other("test finished".to_string()));
        }
        answer
            .await
            .unwrap_or_else(|_| Err(AnalysisError::Other("call dropped".to_string())))
    }
}

pub async fn next_call(calls: &mut mpsc::UnboundedReceiver<DescribeCall>) -> DescribeCall {
    tokio::time::timeout(Duration::from_secs(600), calls.recv())
        .await
        .expect("timed out waiting for a describe call")
        .expect("describer dropped")
}

// ---------------------------------------------------------------------------
// Locators
// ---------------------------------------------------------------------------

pub fn scripted_locator() -> Box<dyn StreamLocator> {
    Box::new(StaticLocator::new(SCRIPTED_URL))
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Observer events as seen by a presentation layer, kept in arrival order.
pub struct Recorded {
    events: cctv_insight::app::SessionEvents,
    pub seen: Vec<SessionEvent>,
}

impl Recorded {
    pub async fn wait_for<F>(&mut self, predicate: F) -> SessionEvent
    where
        F: Fn(&SessionEvent) -> bool,
    {
        let events = &mut self.events;
        let seen = &mut self.seen;
        let search = async {
            while let Some(event) = events.next().await {
                seen.push(event.clone());
                if predicate(&event) {
                    return event;
                }
            }
            panic!("event stream closed before the expected event");
        };
        tokio::time::timeout(Duration::from_secs(600), search)
            .await
            .expect("timed out waiting for a session event")
    }

    pub async fn live(&mut self, sequence: u64) -> LiveState {
        match self
            .wait_for(|e| matches!(e, SessionEvent::LiveUpdate(l) if l.sequence() == sequence))
            .await
        {
            SessionEvent::LiveUpdate(live) => live,
            _ => unreachable!(),
        }
    }

    pub async fn analysis(&mut self, status: AnalysisStatus) -> AnalysisSession {
        match self
            .wait_for(|e| matches!(e, SessionEvent::AnalysisChanged(s) if s.status() == status))
            .await
        {
            SessionEvent::AnalysisChanged(session) => session,
            _ => unreachable!(),
        }
    }

    /// Consumes everything up to and including the termination event.
    pub async fn finish(&mut self) -> Vec<SessionEvent> {
        self.wait_for(|e| matches!(e, SessionEvent::Terminated(_)))
            .await;
        self.seen.clone()
    }
}

pub fn live_updates(events: &[SessionEvent]) -> Vec<LiveState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::LiveUpdate(live) => Some(live.clone()),
            _ => None,
        })
        .collect()
}

pub fn analysis_changes(events: &[SessionEvent]) -> Vec<AnalysisSession> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::AnalysisChanged(session) => Some(session.clone()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub handle: ControllerHandle,
    pub events: Recorded,
    pub task: JoinHandle<ControllerReport>,
}

impl Harness {
    pub async fn report(self) -> ControllerReport {
        self.task.await.expect("controller task panicked")
    }
}

pub fn start(
    source: FrameSource,
    detector: Arc<dyn Detector>,
    describer: Arc<dyn SceneDescriber>,
    drain_timeout: Duration,
) -> Harness {
    let (observer, events) = ChannelObserver::new();
    let (controller, handle) = SessionControllerBuilder::new(source, detector, describer)
        .drain_timeout(drain_timeout)
        .observer("test", Box::new(observer))
        .build()
        .expect("valid controller settings");
    Harness {
        handle,
        events: Recorded {
            events,
            seen: Vec::new(),
        },
        task: tokio::spawn(controller.run()),
    }
}
