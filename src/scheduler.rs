use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::RwLock;
use tokio::sync::{watch, Mutex, Notify};

#[derive(Debug, Clone)]
pub struct MigrationJob {
    pub migration_id: String,
    pub queued_at: DateTime<Utc>,
}

impl MigrationJob {
    pub fn new(migration_id: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            queued_at: Utc::now(),
        }
    }
}

pub type ExecutorFuture = Pin<Box<dyn Future<Output = bool> + Send>>;
pub type Executor = Arc<dyn Fn(String) -> ExecutorFuture + Send + Sync>;

/// FIFO job queue with a global concurrency limit. A migration never has more
/// than one job in flight; a job queued while another for the same migration
/// runs waits for it to finish.
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<Mutex<VecDeque<MigrationJob>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    notify: Arc<Notify>,
    executor: Arc<RwLock<Option<Executor>>>,
    generation: Arc<watch::Sender<u64>>,
    global_limit: usize,
    max_queue_size: usize,
}

impl Scheduler {
    pub fn new(global_limit: usize, max_queue_size: usize) -> Self {
        let (generation, _) = watch::channel(0u64);
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            notify: Arc::new(Notify::new()),
            executor: Arc::new(RwLock::new(None)),
            generation: Arc::new(generation),
            global_limit: global_limit.max(1),
            max_queue_size: max_queue_size.max(1),
        }
    }

    pub fn set_executor(&self, executor: Executor) {
        match self.executor.write() {
            Ok(mut writer) => *writer = Some(executor),
            Err(poisoned) => *poisoned.into_inner() = Some(executor),
        }
    }

    pub async fn enqueue(&self, job: MigrationJob) -> AppResult<()> {
        {
            let mut queue = self.queue.lock().await;
            if queue
                .iter()
                .any(|queued| queued.migration_id == job.migration_id)
            {
                return Ok(());
            }
            if queue.len() >= self.max_queue_size {
                return Err(AppError::Precondition(format!(
                    "job queue capacity exceeded (max {})",
                    self.max_queue_size
                )));
            }
            tracing::debug!(migration_id = %job.migration_id, "queued migration job");
            queue.push_back(job);
        }
        self.bump_generation();
        self.notify.notify_one();
        Ok(())
    }

    pub async fn queued_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// True while a job for the migration is queued or executing.
    pub async fn is_busy(&self, migration_id: &str) -> bool {
        let queue = self.queue.lock().await;
        let in_flight = self.in_flight.lock().await;
        in_flight.contains(migration_id)
            || queue.iter().any(|job| job.migration_id == migration_id)
    }

    /// Resolves once no job for the migration is queued or executing.
    pub async fn wait_idle(&self, migration_id: &str) {
        let mut changes = self.generation.subscribe();
        loop {
            if !self.is_busy(migration_id).await {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn start(&self) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_loop().await;
        });
    }

    async fn run_loop(self) {
        loop {
            self.notify.notified().await;
            while let Some(job) = self.pick_next_job().await {
                let scheduler = self.clone();
                tokio::spawn(async move {
                    let failed = scheduler.execute(job.migration_id.clone()).await;
                    scheduler.release_slot(&job.migration_id).await;
                    if failed {
                        tracing::warn!(migration_id = %job.migration_id, "migration job finished in failed state");
                    }
                    scheduler.bump_generation();
                    scheduler.notify.notify_one();
                });
            }
        }
    }

    async fn execute(&self, migration_id: String) -> bool {
        let executor = match self.executor.read() {
            Ok(reader) => reader.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match executor {
            Some(executor) => executor(migration_id).await,
            None => true,
        }
    }

    /// Takes the oldest job whose migration is not already executing and
    /// reserves a slot for it.
    async fn pick_next_job(&self) -> Option<MigrationJob> {
        let mut queue = self.queue.lock().await;
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.len() >= self.global_limit {
            return None;
        }
        let index = queue
            .iter()
            .position(|job| !in_flight.contains(&job.migration_id))?;
        let job = queue.remove(index)?;
        in_flight.insert(job.migration_id.clone());
        Some(job)
    }

    async fn release_slot(&self, migration_id: &str) {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.remove(migration_id);
    }

    fn bump_generation(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }
}
