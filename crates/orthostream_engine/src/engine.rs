use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use orthostream_core::{ChunkMessage, TreeChunkMessage};
use orthostream_logging::{ortho_debug, ortho_info, ortho_warn};
use tokio_util::sync::CancellationToken;

use crate::transport::Transport;
use crate::{
    ClientSettings, EngineEvent, JobId, JobOutcome, RequestError, RequestExecutor, SearchClient,
    SearchMode, SearchSettings, TreeClient, TreeSettings,
};

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub client: ClientSettings,
    pub search: SearchSettings,
    pub tree: TreeSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineStartError {
    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("failed to build client: {0}")]
    Client(#[from] RequestError),
}

enum EngineCommand {
    Search {
        job_id: JobId,
        query: String,
        mode: SearchMode,
    },
    LoadTree {
        job_id: JobId,
        tree_id: String,
        full: bool,
    },
    Cancel {
        job_id: JobId,
    },
    Stop,
}

#[derive(Clone)]
struct Clients {
    search: SearchClient,
    tree: TreeClient,
}

/// Runs independent jobs concurrently on a background runtime.
///
/// Every job owns its connection, decoder and cancellation token. Results
/// come back as [`EngineEvent`]s in the order each job produced them.
///
/// A job id stays taken until its `JobCompleted` has been sent, cancelled or
/// not. Submitting a taken id yields [`EngineEvent::JobRejected`] and leaves
/// the running job alone.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl EngineHandle {
    pub fn new(config: EngineConfig) -> Result<Self, EngineStartError> {
        let executor = RequestExecutor::new(config.client.clone())?;
        Self::start(config, executor)
    }

    pub fn with_transport(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EngineStartError> {
        let executor = RequestExecutor::with_transport(config.client.clone(), transport)?;
        Self::start(config, executor)
    }

    fn start(config: EngineConfig, executor: RequestExecutor) -> Result<Self, EngineStartError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("orthostream-engine")
            .build()?;
        let executor = Arc::new(executor);
        let clients = Clients {
            search: SearchClient::new(executor.clone(), config.search),
            tree: TreeClient::new(executor, config.tree),
        };

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        thread::spawn(move || run_worker(runtime, clients, cmd_rx, event_tx));

        Ok(Self { cmd_tx, event_rx })
    }

    pub fn search(&self, job_id: JobId, query: impl Into<String>, mode: SearchMode) {
        let _ = self.cmd_tx.send(EngineCommand::Search {
            job_id,
            query: query.into(),
            mode,
        });
    }

    pub fn load_tree(&self, job_id: JobId, tree_id: impl Into<String>, full: bool) {
        let _ = self.cmd_tx.send(EngineCommand::LoadTree {
            job_id,
            tree_id: tree_id.into(),
            full,
        });
    }

    pub fn cancel(&self, job_id: JobId) {
        let _ = self.cmd_tx.send(EngineCommand::Cancel { job_id });
    }

    /// Cancel every running job. The engine keeps accepting new ones.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Stop);
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Wait for the next event. `Disconnected` means the worker is gone and
    /// no further events will arrive.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<EngineEvent, mpsc::RecvTimeoutError> {
        self.event_rx.recv_timeout(timeout)
    }
}

struct Job {
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl Job {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

fn run_worker(
    runtime: tokio::runtime::Runtime,
    clients: Clients,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    let mut jobs: HashMap<JobId, Job> = HashMap::new();

    while let Ok(command) = cmd_rx.recv() {
        jobs.retain(|_, job| !job.is_finished());

        match command {
            EngineCommand::Search {
                job_id,
                query,
                mode,
            } => {
                let Some((cancel, finished)) = register(&mut jobs, job_id, &event_tx) else {
                    continue;
                };
                let client = clients.search.clone();
                let events = event_tx.clone();
                let job = async move {
                    run_search(&client, job_id, &query, mode, cancel, &events).await
                };
                spawn_job(&runtime, job_id, finished, event_tx.clone(), job);
            }
            EngineCommand::LoadTree {
                job_id,
                tree_id,
                full,
            } => {
                let Some((cancel, finished)) = register(&mut jobs, job_id, &event_tx) else {
                    continue;
                };
                let client = clients.tree.clone();
                let events = event_tx.clone();
                let job = async move {
                    run_tree(&client, job_id, &tree_id, full, cancel, &events).await
                };
                spawn_job(&runtime, job_id, finished, event_tx.clone(), job);
            }
            EngineCommand::Cancel { job_id } => match jobs.get(&job_id) {
                Some(job) => {
                    ortho_info!("Cancelling job {}", job_id);
                    job.cancel.cancel();
                }
                None => ortho_debug!("Cancel for job {} which is not running", job_id),
            },
            EngineCommand::Stop => {
                ortho_info!("Stopping {} running jobs", jobs.len());
                for job in jobs.values() {
                    job.cancel.cancel();
                }
            }
        }
    }

    for job in jobs.values() {
        job.cancel.cancel();
    }
}

fn register(
    jobs: &mut HashMap<JobId, Job>,
    job_id: JobId,
    events: &mpsc::Sender<EngineEvent>,
) -> Option<(CancellationToken, Arc<AtomicBool>)> {
    if jobs.contains_key(&job_id) {
        ortho_warn!("Job id {} is still running; rejecting the new job", job_id);
        let _ = events.send(EngineEvent::JobRejected { job_id });
        return None;
    }
    let job = Job {
        cancel: CancellationToken::new(),
        finished: Arc::new(AtomicBool::new(false)),
    };
    let handles = (job.cancel.clone(), job.finished.clone());
    jobs.insert(job_id, job);
    Some(handles)
}

fn spawn_job<F>(
    runtime: &tokio::runtime::Runtime,
    job_id: JobId,
    finished: Arc<AtomicBool>,
    events: mpsc::Sender<EngineEvent>,
    job: F,
) where
    F: Future<Output = Result<JobOutcome, RequestError>> + Send + 'static,
{
    runtime.spawn(async move {
        let result = job.await;
        let _ = events.send(EngineEvent::JobCompleted { job_id, result });
        // Only now may the id be reused, so its events never interleave.
        finished.store(true, Ordering::Release);
    });
}

async fn run_search(
    client: &SearchClient,
    job_id: JobId,
    query: &str,
    mode: SearchMode,
    cancel: CancellationToken,
    events: &mpsc::Sender<EngineEvent>,
) -> Result<JobOutcome, RequestError> {
    let mut outcome = JobOutcome::default();
    match mode {
        SearchMode::Push => {
            let mut stream = client.stream(query, cancel).await?;
            while let Some(message) = stream.next().await {
                let message = message?;
                let server_error = match &message {
                    ChunkMessage::Error { message } => Some(message.clone()),
                    _ => None,
                };
                outcome.delivered += 1;
                let _ = events.send(EngineEvent::SearchMessage { job_id, message });
                if let Some(message) = server_error {
                    return Err(RequestError::Server(message));
                }
            }
            outcome.violations = stream.tracker().violations().len();
        }
        SearchMode::Pull => {
            let mut pager = client.pages(query, cancel);
            while let Some(page) = pager.next().await {
                let page = page?;
                outcome.delivered += 1;
                let _ = events.send(EngineEvent::SearchPage { job_id, page });
            }
        }
    }
    Ok(outcome)
}

async fn run_tree(
    client: &TreeClient,
    job_id: JobId,
    tree_id: &str,
    full: bool,
    cancel: CancellationToken,
    events: &mpsc::Sender<EngineEvent>,
) -> Result<JobOutcome, RequestError> {
    let preview = client.preview(tree_id, cancel.clone()).await?;
    let mut outcome = JobOutcome {
        delivered: 1,
        violations: 0,
    };
    let _ = events.send(EngineEvent::TreePreview {
        job_id,
        preview: preview.preview.clone(),
        elapsed: preview.elapsed,
    });
    if !full {
        return Ok(outcome);
    }

    let Some(mut stream) = client.stream(&preview.preview, cancel).await? else {
        return Ok(outcome);
    };
    while let Some(message) = stream.next().await {
        let message = message?;
        let server_error = match &message {
            TreeChunkMessage::Error { message } => Some(message.clone()),
            _ => None,
        };
        outcome.delivered += 1;
        let _ = events.send(EngineEvent::TreeMessage { job_id, message });
        if let Some(message) = server_error {
            return Err(RequestError::Server(message));
        }
    }
    outcome.violations = stream.tracker().violations().len();
    Ok(outcome)
}
