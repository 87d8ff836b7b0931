use std::fmt;

use crate::common::Frame;
use crate::error::AnalysisError;
use crate::pipeline::live_state::LiveState;
use crate::pipeline::scene::SceneRequest;

/// Identifies one trigger cycle. Strictly increasing per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn value(&self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    Idle,
    Capturing,
    Pending,
    Completed,
    Failed,
}

/// What the user saw when they asked for an analysis.
#[derive(Debug, Clone)]
pub struct CapturedScene {
    raw: Frame,
    annotated: Frame,
    labels: Vec<String>,
    sequence: u64,
}

impl CapturedScene {
    pub fn raw(&self) -> &Frame {
        &self.raw
    }

    pub fn annotated(&self) -> &Frame {
        &self.annotated
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn caption(&self) -> String {
        format!(
            "Frame at analysis time ({} objects detected)",
            self.labels.len()
        )
    }
}

/// Displayable analysis text, tagged informational or error.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResult {
    Explanation(String),
    Error(String),
}

impl AnalysisResult {
    pub fn text(&self) -> &str {
        match self {
            AnalysisResult::Explanation(text) | AnalysisResult::Error(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, AnalysisResult::Error(_))
    }
}

impl From<&AnalysisError> for AnalysisResult {
    fn from(err: &AnalysisError) -> Self {
        AnalysisResult::Error(format!("Scene analysis failed: {}", err))
    }
}

/// The eventual answer of a dispatched scene-description call.
#[derive(Debug)]
pub struct Completion {
    pub generation: Generation,
    pub result: Result<String, AnalysisError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Applied(AnalysisStatus),
    // Belongs to an older trigger; dropped without a trace.
    Superseded,
}

/// On-demand analysis of a frozen live state.
///
/// A trigger always restarts the cycle, whatever the status. Older in-flight
/// calls are not cancelled; their completions simply stop matching the current
/// generation.
#[derive(Debug, Clone)]
pub struct AnalysisSession {
    status: AnalysisStatus,
    generation: Generation,
    captured: Option<CapturedScene>,
    result: Option<AnalysisResult>,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self {
            status: AnalysisStatus::Idle,
            generation: Generation::default(),
            captured: None,
            result: None,
        }
    }

    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn captured(&self) -> Option<&CapturedScene> {
        self.captured.as_ref()
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.status == AnalysisStatus::Pending
    }

    /// Freezes `live` into the session and opens a new generation.
    pub fn capture(&mut self, live: &LiveState) -> Generation {
        self.generation = self.generation.next();
        self.captured = Some(CapturedScene {
            raw: live.raw().clone(),
            annotated: live.annotated().clone(),
            labels: live.labels(),
            sequence: live.sequence(),
        });
        self.result = None;
        self.status = AnalysisStatus::Capturing;
        self.generation
    }

    /// Moves a fresh capture to Pending and returns the request to send.
    /// The request carries the captured raw frame and labels, never live ones.
    pub fn dispatch(&mut self) -> Option<SceneRequest> {
        if self.status != AnalysisStatus::Capturing {
            return None;
        }
        let captured = self.captured.as_ref()?;
        self.status = AnalysisStatus::Pending;
        Some(SceneRequest {
            generation: self.generation,
            image: captured.raw.clone(),
            labels: captured.labels.clone(),
        })
    }

    pub fn apply(&mut self, completion: Completion) -> CompletionOutcome {
        if completion.generation != self.generation || self.status != AnalysisStatus::Pending {
            return CompletionOutcome::Superseded;
        }
        match completion.result {
            Ok(text) => {
                self.result = Some(AnalysisResult::Explanation(text));
                self.status = AnalysisStatus::Completed;
            }
            Err(err) => {
                self.result = Some(AnalysisResult::from(&err));
                self.status = AnalysisStatus::Failed;
            }
        }
        CompletionOutcome::Applied(self.status)
    }
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new()
    }
}
