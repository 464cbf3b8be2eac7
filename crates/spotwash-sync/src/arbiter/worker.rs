use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ActivateReport, CacheArbiter, FetchOutcome, InstallReport};
use crate::error::ArbiterError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, NetworkFailure};

const WORKER_MAILBOX: usize = 64;

/// Requests from the page side into the worker.
#[derive(Debug)]
pub enum WorkerMessage {
    Install {
        reply: oneshot::Sender<Result<InstallReport, ArbiterError>>,
    },
    Activate {
        reply: oneshot::Sender<ActivateReport>,
    },
    Fetch {
        request: HttpRequest,
        reply: oneshot::Sender<Result<FetchOutcome, ArbiterError>>,
    },
    CacheKeys {
        reply: oneshot::Sender<Vec<String>>,
    },
    BackgroundSync {
        tag: String,
    },
    PeriodicSync {
        tag: String,
    },
    Push {
        title: String,
        body: String,
    },
}

/// Messages from the worker back to the page side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Connectivity returned in the background; drain the replay queue.
    ReplayRequested { tag: String },
    /// Periodic sync fired; refresh live data.
    RefreshRequested { tag: String },
    ShowNotification { title: String, body: String },
}

pub struct ArbiterWorker;

impl ArbiterWorker {
    /// Move the arbiter onto its own task. The task ends once every handle is
    /// dropped.
    pub fn spawn<T>(
        arbiter: CacheArbiter<T>,
        control: mpsc::UnboundedSender<ControlMessage>,
    ) -> ArbiterHandle
    where
        T: HttpTransport + 'static,
    {
        let (tx, rx) = mpsc::channel(WORKER_MAILBOX);
        let task = tokio::spawn(run(Arc::new(arbiter), rx, control));
        ArbiterHandle {
            tx,
            task: Arc::new(task),
        }
    }
}

async fn run<T>(
    arbiter: Arc<CacheArbiter<T>>,
    mut rx: mpsc::Receiver<WorkerMessage>,
    control: mpsc::UnboundedSender<ControlMessage>,
) where
    T: HttpTransport + 'static,
{
    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Install { reply } => {
                let _ = reply.send(arbiter.install().await);
            }
            WorkerMessage::Activate { reply } => {
                let _ = reply.send(arbiter.activate().await);
            }
            WorkerMessage::Fetch { request, reply } => {
                // Fetches run off the mailbox loop.
                let arbiter = Arc::clone(&arbiter);
                tokio::spawn(async move {
                    let _ = reply.send(arbiter.handle_fetch(request).await);
                });
            }
            WorkerMessage::CacheKeys { reply } => {
                let _ = reply.send(arbiter.cache_keys().await);
            }
            WorkerMessage::BackgroundSync { tag } => {
                info!(tag = %tag, "background sync fired");
                forward(&control, ControlMessage::ReplayRequested { tag });
            }
            WorkerMessage::PeriodicSync { tag } => {
                debug!(tag = %tag, "periodic sync fired");
                forward(&control, ControlMessage::RefreshRequested { tag });
            }
            WorkerMessage::Push { title, body } => {
                forward(&control, ControlMessage::ShowNotification { title, body });
            }
        }
    }
    debug!("arbiter worker stopped");
}

fn forward(control: &mpsc::UnboundedSender<ControlMessage>, message: ControlMessage) {
    if control.send(message).is_err() {
        warn!("no page is listening for worker control messages");
    }
}

/// Page-side handle to the worker. Cloning shares the same worker.
#[derive(Debug, Clone)]
pub struct ArbiterHandle {
    tx: mpsc::Sender<WorkerMessage>,
    task: Arc<JoinHandle<()>>,
}

impl ArbiterHandle {
    pub async fn install(&self) -> Result<InstallReport, ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.post(WorkerMessage::Install { reply }).await?;
        rx.await.map_err(|_| ArbiterError::WorkerGone)?
    }

    pub async fn activate(&self) -> Result<ActivateReport, ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.post(WorkerMessage::Activate { reply }).await?;
        rx.await.map_err(|_| ArbiterError::WorkerGone)
    }

    pub async fn fetch(&self, request: HttpRequest) -> Result<FetchOutcome, ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.post(WorkerMessage::Fetch { request, reply }).await?;
        rx.await.map_err(|_| ArbiterError::WorkerGone)?
    }

    pub async fn cache_keys(&self) -> Result<Vec<String>, ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.post(WorkerMessage::CacheKeys { reply }).await?;
        rx.await.map_err(|_| ArbiterError::WorkerGone)
    }

    pub async fn background_sync(&self, tag: impl Into<String>) -> Result<(), ArbiterError> {
        self.post(WorkerMessage::BackgroundSync { tag: tag.into() })
            .await
    }

    pub async fn periodic_sync(&self, tag: impl Into<String>) -> Result<(), ArbiterError> {
        self.post(WorkerMessage::PeriodicSync { tag: tag.into() })
            .await
    }

    pub async fn push(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<(), ArbiterError> {
        self.post(WorkerMessage::Push {
            title: title.into(),
            body: body.into(),
        })
        .await
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    async fn post(&self, message: WorkerMessage) -> Result<(), ArbiterError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| ArbiterError::WorkerGone)
    }
}

/// Page-side requests routed through the worker, so every call the gateway
/// makes is subject to the caching strategies.
#[async_trait]
impl HttpTransport for ArbiterHandle {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkFailure> {
        match self.fetch(request).await {
            Ok(outcome) => Ok(outcome.response),
            Err(ArbiterError::Network(failure)) => Err(failure),
            Err(other) => Err(NetworkFailure::new(other.to_string())),
        }
    }
}
