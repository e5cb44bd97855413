//! Orchestrator wiring the watcher, the job pool and the control channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicUsize};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::config::{snapshot, shared, ConfigStore, ServiceConfig, SharedConfig};
use crate::control::{ClientRegistry, ControlError, ControlServer, ControlService, ServerHandle};
use crate::convert::Converter;
use crate::job::{Job, JobId};
use crate::watcher::{JobDirectoryWatcher, WatcherError};

/// Error type for service lifecycle operations.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    /// `start` was called on a running service.
    #[error("Service already running")]
    AlreadyRunning,

    /// A configured directory could not be created.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input directory watch could not be set up.
    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// The control endpoint could not be opened.
    #[error("Control channel error: {0}")]
    Control(#[from] ControlError),
}

type ActiveJobs = Arc<Mutex<HashMap<JobId, String>>>;

fn lock_active(active: &Mutex<HashMap<JobId, String>>) -> MutexGuard<'_, HashMap<JobId, String>> {
    active
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// State shared by the dispatcher task and direct submissions.
struct JobPool {
    config: SharedConfig,
    converter: Arc<dyn Converter>,
    registry: Arc<ClientRegistry>,
    active: ActiveJobs,
    permits: Arc<Semaphore>,
    size: AtomicUsize,
    tracker: TaskTracker,
}

impl JobPool {
    /// Grows or shrinks the pool to `target` workers.
    ///
    /// Shrinking waits for busy workers to hand their permits back.
    fn resize(&self, target: usize) {
        let current = self.size.swap(target, atomic::Ordering::AcqRel);
        match target.cmp(&current) {
            Ordering::Greater => self.permits.add_permits(target - current),
            Ordering::Less => {
                let surplus = u32::try_from(current - target).unwrap_or(u32::MAX);
                let permits = Arc::clone(&self.permits);
                tokio::spawn(async move {
                    if let Ok(permit) = permits.acquire_many_owned(surplus).await {
                        permit.forget();
                    }
                });
            }
            Ordering::Equal => return,
        }
        tracing::info!(from = current, to = target, "Worker pool resized");
    }

    fn submit(&self, path: &Path) -> Option<JobId> {
        let Some(mut job) = Job::from_path(path) else {
            tracing::warn!(path = %path.display(), "Ignoring work file without a usable name");
            return None;
        };
        let id = job.id();
        let name = job.file_name().to_string();
        lock_active(&self.active).insert(id, name.clone());

        let registry = Arc::clone(&self.registry);
        let relay_name = name.clone();
        job.subscribe(move |entry| {
            registry.broadcast_log_line(&format!("{relay_name}\t{}", entry.render()), entry.severity);
        });

        let active = Arc::clone(&self.active);
        job.on_end(move |state| {
            lock_active(&active).remove(&id);
            tracing::info!(job = %name, %state, "Job finished");
        });

        let permits = Arc::clone(&self.permits);
        let config = Arc::clone(&self.config);
        let converter = Arc::clone(&self.converter);
        self.tracker.spawn(async move {
            // a closed pool drops the job, which ends it as failed
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let config = snapshot(&config);
            job.run(&config, converter.as_ref()).await;
        });

        tracing::debug!(job = %id, path = %path.display(), "Job queued");
        Some(id)
    }
}

struct Running {
    server: ServerHandle,
    // dropping the watcher ends the watch and, with it, the dispatcher
    _watcher: JobDirectoryWatcher,
    dispatcher: JoinHandle<()>,
}

/// Watches the input directory and runs one job per work file on a bounded
/// pool, relaying every job log line to the control channel.
///
/// Most options are read when a job starts. `input_dir`, `control_socket`
/// and `worker_threads` apply on the next `start`.
pub struct DistillingService {
    pool: Arc<JobPool>,
    control: Arc<ControlService>,
    running: Option<Running>,
}

impl DistillingService {
    #[must_use]
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn ConfigStore>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        let size = config.pool_size();
        let config = shared(config);
        let registry = Arc::new(ClientRegistry::new());
        let control = Arc::new(ControlService::new(
            Arc::clone(&config),
            store,
            Arc::clone(&registry),
        ));

        Self {
            pool: Arc::new(JobPool {
                config,
                converter,
                registry,
                active: Arc::new(Mutex::new(HashMap::new())),
                permits: Arc::new(Semaphore::new(size)),
                size: AtomicUsize::new(size),
                tracker: TaskTracker::new(),
            }),
            control,
            running: None,
        }
    }

    /// Opens the control endpoint and starts watching the input directory.
    ///
    /// Creates the input, working and output directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is already running, a directory
    /// cannot be created, or the socket or watch cannot be set up.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        if self.running.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }

        let config = snapshot(&self.pool.config);
        for dir in [&config.input_dir, &config.working_dir, &config.output_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ServiceError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }

        let server = ControlServer::new(&config.control_socket).start(Arc::clone(&self.control))?;
        self.pool.resize(config.pool_size());
        let (watcher, paths) =
            JobDirectoryWatcher::new(config.input_dir.clone(), Arc::clone(&self.pool.config))?;
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&self.pool), paths));

        tracing::info!(
            input = %config.input_dir.display(),
            output = %config.output_dir.display(),
            socket = %server.socket_path().display(),
            workers = config.pool_size(),
            "Service started"
        );
        self.running = Some(Running {
            server,
            _watcher: watcher,
            dispatcher,
        });
        Ok(())
    }

    /// Disconnects all clients, closes the control endpoint and stops the
    /// watch. Jobs already queued or running are left to finish.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.pool.registry.disconnect_all();
        running.server.shutdown();
        running.dispatcher.abort();
        drop(running);
        tracing::info!("Service stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Queues a job for the work file at `path`.
    ///
    /// Returns `None` if the path has no usable file name.
    pub fn submit(&self, path: &Path) -> Option<JobId> {
        self.pool.submit(path)
    }

    /// File names of jobs that have not reached a terminal state, sorted.
    #[must_use]
    pub fn active_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = lock_active(&self.pool.active).values().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        lock_active(&self.pool.active).len()
    }

    /// Waits until every submitted job has finished.
    pub async fn wait_for_idle(&self) {
        self.pool.tracker.close();
        self.pool.tracker.wait().await;
        self.pool.tracker.reopen();
    }

    /// The live configuration.
    #[must_use]
    pub fn config(&self) -> SharedConfig {
        Arc::clone(&self.pool.config)
    }

    /// Clients registered on the control channel.
    #[must_use]
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.pool.registry)
    }
}

impl Drop for DistillingService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Submits every path the watcher reports until the watch ends.
async fn dispatch(pool: Arc<JobPool>, mut paths: mpsc::UnboundedReceiver<PathBuf>) {
    while let Some(path) = paths.recv().await {
        pool.submit(&path);
    }
    tracing::debug!("Dispatcher stopped");
}
