use super::*;
use crate::staging::Stager;
use crate::transcribe::{
    ProgressSink, TranscribeError, Transcriber, TranscriptionResult,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct CountingBackend {
    preloads: AtomicUsize,
    fail_preload: bool,
}

#[tonic::async_trait]
impl Transcriber for CountingBackend {
    async fn transcribe(
        &self,
        _audio: &Path,
        _request: &TranscriptionRequest,
        _progress: &ProgressSink,
    ) -> Result<TranscriptionResult, TranscribeError> {
        Ok(TranscriptionResult::default())
    }

    fn name(&self) -> &'static str {
        "counting"
    }

    async fn preload(&self, _request: &TranscriptionRequest) -> anyhow::Result<()> {
        self.preloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_preload {
            anyhow::bail!("model download failed");
        }
        Ok(())
    }
}

fn create_controller(
    config: Config,
    backend: Arc<CountingBackend>,
) -> (Controller<CountingBackend>, oneshot::Receiver<()>) {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let pipeline = Pipeline::new(backend, Stager::default(), None);
    (Controller::new(config, pipeline, shutdown_tx), shutdown_rx)
}

#[tokio::test]
async fn test_initial_state_is_initializing() {
    let (controller, _) = create_controller(Config::default(), Arc::default());
    assert_eq!(controller.state().await, ControllerState::Initializing);
    assert!(!controller.status().await.ready);
}

#[tokio::test]
async fn test_initialize_without_preload_skips_backend() {
    let backend = Arc::new(CountingBackend::default());
    let (controller, _) = create_controller(Config::default(), Arc::clone(&backend));

    controller.initialize().await;

    assert_eq!(controller.state().await, ControllerState::Ready);
    assert_eq!(backend.preloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_initialize_preloads_when_configured() {
    let backend = Arc::new(CountingBackend::default());
    let mut config = Config::default();
    config.model.preload = true;
    let (controller, _) = create_controller(config, Arc::clone(&backend));

    controller.initialize().await;

    assert_eq!(backend.preloads.load(Ordering::SeqCst), 1);
    assert!(controller.status().await.ready);
}

#[tokio::test]
async fn test_failed_preload_still_becomes_ready() {
    let backend = Arc::new(CountingBackend {
        fail_preload: true,
        ..CountingBackend::default()
    });
    let mut config = Config::default();
    config.model.preload = true;
    let (controller, _) = create_controller(config, backend);

    controller.initialize().await;

    assert_eq!(controller.state().await, ControllerState::Ready);
}

#[tokio::test]
async fn test_open_session_uses_configured_auto_run() {
    let mut config = Config::default();
    config.session.auto_run = false;
    let (controller, _) = create_controller(config, Arc::default());

    let default = controller.open_session(None).await;
    let explicit = controller.open_session(Some(true)).await;

    assert!(!default.snapshot().auto_run);
    assert!(explicit.snapshot().auto_run);
}

#[tokio::test]
async fn test_status_counts_sessions() {
    let (controller, _) = create_controller(Config::default(), Arc::default());
    let session = controller.open_session(None).await;
    controller.open_session(None).await;

    let status = controller.status().await;
    assert_eq!(status.sessions, 2);
    assert_eq!(status.busy_sessions, 0);
    assert_eq!(status.backend, "counting");

    controller.close_session(session.id()).await.unwrap();
    assert_eq!(controller.status().await.sessions, 1);
    assert_eq!(
        controller.session(session.id()).await.unwrap_err(),
        SessionError::NotFound(session.id())
    );
}

#[tokio::test]
async fn test_shutdown_sends_signal_once() {
    let (controller, shutdown_rx) = create_controller(Config::default(), Arc::default());

    controller.shutdown().await;
    controller.shutdown().await;

    assert_eq!(controller.state().await, ControllerState::Stopped);
    assert!(shutdown_rx.await.is_ok());
}

#[tokio::test]
async fn test_mark_ready_after_shutdown_stays_stopped() {
    let (controller, _rx) = create_controller(Config::default(), Arc::default());
    controller.shutdown().await;
    controller.mark_ready().await;
    assert_eq!(controller.state().await, ControllerState::Stopped);
}
