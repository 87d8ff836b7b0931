use async_trait::async_trait;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tower::{timeout::TimeoutLayer, util::BoxCloneService, BoxError, Service, ServiceBuilder};

use crate::common::Frame;
use crate::error::AnalysisError;
use crate::pipeline::session::Generation;

/// Vision-language model contract: image plus detected labels in, prose out.
#[async_trait]
pub trait SceneDescriber: Send + Sync {
    async fn describe(&self, image: &Frame, labels: &[String]) -> Result<String, AnalysisError>;
}

/// One dispatched analysis, tagged with the trigger that produced it.
#[derive(Debug, Clone)]
pub struct SceneRequest {
    pub generation: Generation,
    pub image: Frame,
    pub labels: Vec<String>,
}

#[derive(Clone)]
pub struct DescriberService {
    inner: Arc<dyn SceneDescriber>,
}

impl DescriberService {
    pub fn new(inner: Arc<dyn SceneDescriber>) -> Self {
        Self { inner }
    }
}

impl Service<SceneRequest> for DescriberService {
    type Response = String;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: SceneRequest) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .describe(&request.image, &request.labels)
                .await
                .map_err(BoxError::from)
        })
    }
}

pub type DescriberStack = BoxCloneService<SceneRequest, String, BoxError>;

pub struct DescriberStackBuilder {
    describer: Arc<dyn SceneDescriber>,
    timeout: Option<Duration>,
}

impl DescriberStackBuilder {
    pub fn new(describer: Arc<dyn SceneDescriber>) -> Self {
        Self {
            describer,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> DescriberStack {
        let service = ServiceBuilder::new()
            .option_layer(self.timeout.map(TimeoutLayer::new))
            .service(DescriberService::new(self.describer));
        BoxCloneService::new(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PixelFormat, Resolution};
    use tower::ServiceExt;

    struct Echo;

    #[async_trait]
    impl SceneDescriber for Echo {
        async fn describe(&self, _image: &Frame, labels: &[String]) -> Result<String, AnalysisError> {
            if labels.is_empty() {
                return Err(AnalysisError::EmptyResponse);
            }
            Ok(labels.join("+"))
        }
    }

    struct Stalled;

    #[async_trait]
    impl SceneDescriber for Stalled {
        async fn describe(&self, _image: &Frame, _labels: &[String]) -> Result<String, AnalysisError> {
            futures::future::pending().await
        }
    }

    fn request(labels: &[&str]) -> SceneRequest {
        SceneRequest {
            generation: Generation::default(),
            image: Frame::filled(Resolution::new(2, 2), [0, 0, 0], PixelFormat::Bgr),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn stack_passes_labels_through() {
        let stack = DescriberStackBuilder::new(Arc::new(Echo)).build();
        let text = stack.oneshot(request(&["car", "bus"])).await.unwrap();
        assert_eq!(text, "car+bus");
    }

    #[tokio::test]
    async fn describer_errors_survive_boxing() {
        let stack = DescriberStackBuilder::new(Arc::new(Echo)).build();
        let err = stack.oneshot(request(&[])).await.unwrap_err();
        assert_eq!(AnalysisError::from_boxed(err), AnalysisError::EmptyResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_timeout_cuts_off_slow_calls() {
        let stack = DescriberStackBuilder::new(Arc::new(Stalled))
            .timeout(Some(Duration::from_secs(5)))
            .build();
        let err = stack.oneshot(request(&["car"])).await.unwrap_err();
        assert_eq!(AnalysisError::from_boxed(err), AnalysisError::TimedOut);
    }
}
