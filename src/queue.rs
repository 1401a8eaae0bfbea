use crate::error::{MangaUpError, Result};
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Snapshot of a submitted job.
#[derive(Debug, Clone)]
pub struct Job<T> {
    pub id: JobId,
    pub label: String,
    pub status: JobStatus,
    pub result: Option<T>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

struct QueuedJob<T> {
    id: JobId,
    task: BoxFuture<'static, anyhow::Result<T>>,
}

struct JobEntry<T> {
    job: Job<T>,
    status_tx: watch::Sender<JobStatus>,
}

struct JobTable<T> {
    jobs: Mutex<HashMap<JobId, JobEntry<T>>>,
}

impl<T> JobTable<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry<T>>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Pending -> Running. False when the job was cancelled meanwhile.
    fn start(&self, id: JobId) -> bool {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(entry) if entry.job.status == JobStatus::Pending => {
                entry.job.status = JobStatus::Running;
                entry.job.started_at = Some(Utc::now());
                entry.status_tx.send_replace(JobStatus::Running);
                true
            }
            _ => false,
        }
    }

    fn finish(&self, id: JobId, outcome: std::result::Result<T, String>) {
        let mut jobs = self.lock();
        let Some(entry) = jobs.get_mut(&id) else {
            return;
        };
        if entry.job.status.is_terminal() {
            return;
        }
        let status = match outcome {
            Ok(value) => {
                entry.job.result = Some(value);
                JobStatus::Completed
            }
            Err(err) => {
                entry.job.error = Some(err);
                JobStatus::Failed
            }
        };
        entry.job.status = status;
        entry.job.completed_at = Some(Utc::now());
        entry.status_tx.send_replace(status);
    }
}

/// Fixed pool of workers draining a FIFO of jobs.
///
/// Jobs move `Pending -> Running -> Completed | Failed`. A running job is
/// never interrupted; shutdown only cancels jobs that have not started.
pub struct JobQueue<T> {
    table: Arc<JobTable<T>>,
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedJob<T>>>>,
    accepting: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> JobQueue<T>
where
    T: Clone + Send + 'static,
{
    /// Spawn `worker_count` workers on the current tokio runtime.
    pub fn start(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let table = Arc::new(JobTable {
            jobs: Mutex::new(HashMap::new()),
        });

        info!("Starting job queue with {} workers", worker_count);
        let workers = (0..worker_count)
            .map(|i| {
                let name = format!("worker-{}", i);
                tokio::spawn(run_worker(name, Arc::clone(&table), Arc::clone(&receiver)))
            })
            .collect();

        Self {
            table,
            sender: Mutex::new(Some(sender)),
            accepting: AtomicBool::new(true),
            workers: Mutex::new(workers),
        }
    }

    /// Queue a job and return its handle immediately.
    pub fn submit<F>(&self, label: impl Into<String>, task: F) -> Result<JobId>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(MangaUpError::QueueClosed);
        }

        let id = Uuid::new_v4();
        let label = label.into();
        let (status_tx, _) = watch::channel(JobStatus::Pending);
        let job = Job {
            id,
            label: label.clone(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.table.lock().insert(id, JobEntry { job, status_tx });

        let sender = lock_or_recover(&self.sender);
        let sent = match sender.as_ref() {
            Some(tx) => tx.send(QueuedJob { id, task: task.boxed() }).is_ok(),
            None => false,
        };
        drop(sender);
        if !sent {
            self.table.lock().remove(&id);
            return Err(MangaUpError::QueueClosed);
        }

        debug!("Job {} ({}) added to queue", id, label);
        Ok(id)
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.table.lock().get(&id).map(|entry| entry.job.status)
    }

    pub fn job(&self, id: JobId) -> Option<Job<T>> {
        self.table.lock().get(&id).map(|entry| entry.job.clone())
    }

    /// Wait until the job reaches a terminal state or `timeout` elapses.
    pub async fn await_job(&self, id: JobId, timeout: Duration) -> Result<Job<T>> {
        let mut status_rx = {
            let jobs = self.table.lock();
            let entry = jobs.get(&id).ok_or_else(|| MangaUpError::job_not_found(id))?;
            entry.status_tx.subscribe()
        };

        match tokio::time::timeout(timeout, status_rx.wait_for(JobStatus::is_terminal)).await {
            Ok(Ok(_)) => {}
            // The sender lives in the table, so this only happens if the job vanished.
            Ok(Err(_)) => return Err(MangaUpError::job_not_found(id)),
            Err(_) => return Err(MangaUpError::job_timeout(id)),
        }
        self.job(id).ok_or_else(|| MangaUpError::job_not_found(id))
    }

    /// Stop accepting jobs, fail every job that has not started, and wait up
    /// to `grace` for running jobs. Returns false when workers had to be
    /// detached still busy.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return true;
        }
        info!("Stopping job queue...");

        // Closing the channel lets idle workers exit once it is drained.
        lock_or_recover(&self.sender).take();

        let pending: Vec<JobId> = self
            .table
            .lock()
            .values()
            .filter(|entry| entry.job.status == JobStatus::Pending)
            .map(|entry| entry.job.id)
            .collect();
        for id in &pending {
            self.table.finish(*id, Err("Cancelled before start".to_string()));
        }
        if !pending.is_empty() {
            info!("Cancelled {} queued job(s)", pending.len());
        }

        let workers: Vec<_> = lock_or_recover(&self.workers).drain(..).collect();
        match tokio::time::timeout(grace, join_all(workers)).await {
            Ok(_) => {
                info!("Job queue stopped");
                true
            }
            Err(_) => {
                warn!("Workers didn't stop within {:?}, detaching from running jobs", grace);
                false
            }
        }
    }
}

async fn run_worker<T>(
    name: String,
    table: Arc<JobTable<T>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob<T>>>>,
) where
    T: Send + 'static,
{
    debug!("{} started", name);
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(queued) = next else {
            break;
        };
        if !table.start(queued.id) {
            debug!("{} skipping cancelled job {}", name, queued.id);
            continue;
        }

        debug!("{} processing {}", name, queued.id);
        let outcome = match AssertUnwindSafe(queued.task).catch_unwind().await {
            Ok(Ok(value)) => {
                debug!("{} completed {}", name, queued.id);
                Ok(value)
            }
            Ok(Err(err)) => {
                error!("{} failed {}: {:#}", name, queued.id, err);
                Err(format!("{:#}", err))
            }
            Err(_) => {
                error!("{} job {} panicked", name, queued.id);
                Err("Job panicked".to_string())
            }
        };
        table.finish(queued.id, outcome);
    }
    debug!("{} stopped", name);
}

fn lock_or_recover<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn completed_job_carries_result() {
        let queue: JobQueue<u32> = JobQueue::start(2);
        let id = queue.submit("answer", async { Ok(42) }).unwrap();

        let job = queue.await_job(id, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(42));
        assert!(job.started_at.is_some() && job.completed_at.is_some());
        assert_eq!(queue.status(id), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn errors_and_panics_fail_the_job() {
        let queue: JobQueue<u32> = JobQueue::start(1);
        let failing = queue
            .submit("fails", async { Err(anyhow::anyhow!("host unreachable")) })
            .unwrap();
        let panicking = queue
            .submit("panics", async {
                if true {
                    panic!("boom");
                }
                Ok(1)
            })
            .unwrap();
        let after = queue.submit("after", async { Ok(7) }).unwrap();

        let job = queue.await_job(failing, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("host unreachable"));

        let job = queue.await_job(panicking, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        // The worker survives the panic.
        let job = queue.await_job(after, WAIT).await.unwrap();
        assert_eq!(job.result, Some(7));
    }

    #[tokio::test]
    async fn single_worker_runs_jobs_in_fifo_order() {
        let queue: JobQueue<usize> = JobQueue::start(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let ids: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                queue
                    .submit(format!("job-{}", i), async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        order.lock().unwrap().push(i);
                        Ok(i)
                    })
                    .unwrap()
            })
            .collect();

        for id in ids {
            queue.await_job(id, WAIT).await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn worker_pool_bounds_parallel_jobs() {
        let queue: JobQueue<()> = JobQueue::start(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let ids: Vec<_> = (0..6)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                queue
                    .submit(format!("job-{}", i), async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();

        for id in ids {
            queue.await_job(id, WAIT).await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn await_times_out_and_unknown_jobs_error() {
        let queue: JobQueue<()> = JobQueue::start(1);
        let id = queue
            .submit("slow", async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            })
            .unwrap();

        let err = queue.await_job(id, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, MangaUpError::JobTimeout(_)));

        let err = queue.await_job(Uuid::new_v4(), WAIT).await.unwrap_err();
        assert!(matches!(err, MangaUpError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn shutdown_cancels_queued_jobs_and_lets_running_finish() {
        let queue: JobQueue<&'static str> = JobQueue::start(1);
        let running = queue
            .submit("running", async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok("done")
            })
            .unwrap();
        let queued = queue.submit("queued", async { Ok("never") }).unwrap();

        // Let the worker pick up the first job.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.status(running), Some(JobStatus::Running));

        assert!(queue.shutdown(WAIT).await);

        let job = queue.job(queued).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Cancelled before start"));
        assert_eq!(queue.job(running).unwrap().result, Some("done"));

        assert!(matches!(
            queue.submit("late", async { Ok("late") }),
            Err(MangaUpError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn shutdown_detaches_after_grace() {
        let queue: JobQueue<()> = JobQueue::start(1);
        let id = queue
            .submit("stuck", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!queue.shutdown(Duration::from_millis(50)).await);
        assert_eq!(queue.status(id), Some(JobStatus::Running));
    }
}
