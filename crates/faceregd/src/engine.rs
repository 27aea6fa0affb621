use facereg_core::{ExtractSettings, Extraction, Extractor, FaceModel, ModelError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("face model error: {0}")]
    Model(#[from] ModelError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Extract {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Extraction, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode an uploaded image and extract the first face's encoding.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Extraction, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The model is loaded by the caller and moved into the thread, which owns it
/// for the rest of the process. Requests are served one at a time.
pub fn spawn_engine<M>(model: M, settings: ExtractSettings) -> Result<EngineHandle, EngineError>
where
    M: FaceModel + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let mut extractor = Extractor::new(model, settings);

    std::thread::Builder::new()
        .name("facereg-engine".into())
        .spawn(move || {
            tracing::info!(settings = ?extractor.settings(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, reply } => {
                        let result = run_extract(&mut extractor, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_extract<M: FaceModel>(
    extractor: &mut Extractor<M>,
    bytes: &[u8],
) -> Result<Extraction, EngineError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    tracing::debug!(width = image.width(), height = image.height(), "extract: image decoded");

    let extraction = extractor.extract(&image)?;
    if extraction == Extraction::NoFaceFound {
        tracing::info!("extract: no face detected");
    }
    Ok(extraction)
}
