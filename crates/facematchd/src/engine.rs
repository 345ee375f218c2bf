use facematch_core::{DetectedFace, EngineError, FaceEngine, FaceExpression};
use image::DynamicImage;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    DetectAll {
        image: DynamicImage,
        reply: Reply<Vec<DetectedFace>>,
    },
    DetectSingle {
        image: DynamicImage,
        reply: Reply<Option<DetectedFace>>,
    },
    Expressions {
        image: DynamicImage,
        reply: Reply<Vec<FaceExpression>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
    expressions: bool,
}

impl EngineHandle {
    /// Every face in the image with its descriptor.
    pub async fn detect_all(&self, image: DynamicImage) -> Result<Vec<DetectedFace>, DispatchError> {
        self.call(|reply| EngineRequest::DetectAll { image, reply }).await
    }

    /// The most confident face, if any.
    pub async fn detect_single(
        &self,
        image: DynamicImage,
    ) -> Result<Option<DetectedFace>, DispatchError> {
        self.call(|reply| EngineRequest::DetectSingle { image, reply }).await
    }

    /// Expression label for every face.
    pub async fn classify_expressions(
        &self,
        image: DynamicImage,
    ) -> Result<Vec<FaceExpression>, DispatchError> {
        self.call(|reply| EngineRequest::Expressions { image, reply }).await
    }

    pub fn supports_expressions(&self) -> bool {
        self.expressions
    }

    /// Queue a request and wait for the reply. The timeout covers both the
    /// wait for a queue slot and the engine's own work.
    async fn call<T>(
        &self,
        request: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, DispatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(request(reply_tx))
                .await
                .map_err(|_| DispatchError::ChannelClosed)?;
            reply_rx.await.map_err(|_| DispatchError::ChannelClosed)
        };

        let result = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| DispatchError::Timeout(self.timeout))??;
        Ok(result?)
    }
}

/// Move the engine onto a dedicated OS thread and return a handle to it.
///
/// The engine keeps exclusive ownership of its model sessions; requests are
/// served one at a time in arrival order.
pub fn spawn_engine(
    mut engine: Box<dyn FaceEngine>,
    timeout: Duration,
) -> std::io::Result<EngineHandle> {
    let expressions = engine.supports_expressions();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                // A dropped receiver means the caller timed out; nothing to do.
                match req {
                    EngineRequest::DetectAll { image, reply } => {
                        let _ = reply.send(engine.detect_all(&image));
                    }
                    EngineRequest::DetectSingle { image, reply } => {
                        let _ = reply.send(engine.detect_single(&image));
                    }
                    EngineRequest::Expressions { image, reply } => {
                        let _ = reply.send(engine.classify_expressions(&image));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        timeout,
        expressions,
    })
}
