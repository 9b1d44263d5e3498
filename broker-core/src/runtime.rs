use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use broker_db::{model::OperationState, params};
use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::tasks::{self, TaskContext, TaskError};

/// Builds a fresh `TaskContext` (fresh DB connection included) for one step
/// attempt. Boxed-future rather than `async fn` in a trait so the runtime can
/// hold it as a trait object alongside the rest of its state.
pub type ContextFactory = Box<dyn Fn() -> Pin<Box<dyn Future<Output = TaskContext> + Send>> + Send + Sync>;

/// One (operation, step list, cursor) unit of work handed to the runtime.
/// The cursor lets a requeued job resume at the step it left off on rather
/// than re-running already-committed steps.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub operation_id: i64,
    pub steps: Vec<&'static str>,
    pub cursor: usize,
}

impl PipelineJob {
    pub fn new(operation_id: i64, steps: &'static [&'static str]) -> Self {
        Self {
            operation_id,
            steps: steps.to_vec(),
            cursor: 0,
        }
    }
}

/// The boundary `broker-web`'s binary dispatches through, kept separate from
/// `PipelineRunner` so a test can substitute an in-process fake.
#[async_trait]
pub trait PipelineQueue: Send + Sync {
    async fn enqueue(&self, instance_id: String, job: PipelineJob);
}

struct Inner {
    make_context: ContextFactory,
    permits: Arc<Semaphore>,
    max_attempts: u32,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<PipelineJob>>>,
}

/// FIFO-per-instance worker pool. Each instance gets its own ordered queue so
/// "no two operations of an instance run concurrently" holds without a
/// database-level lock; a bounded semaphore caps how many instance queues run
/// their current step at once.
#[derive(Clone)]
pub struct PipelineRunner(Arc<Inner>);

impl PipelineRunner {
    pub fn new(concurrency: usize, max_attempts: u32, make_context: ContextFactory) -> Self {
        PipelineRunner(Arc::new(Inner {
            make_context,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            max_attempts,
            queues: Mutex::new(HashMap::new()),
        }))
    }

    async fn queue_for(&self, instance_id: &str) -> mpsc::UnboundedSender<PipelineJob> {
        let mut queues = self.0.queues.lock().await;
        if let Some(tx) = queues.get(instance_id) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(instance_id.to_owned(), tx.clone());
        let runner = self.clone();
        let instance_id = instance_id.to_owned();
        tokio::spawn(async move { runner.drain(instance_id, rx).await });
        tx
    }

    async fn drain(self, instance_id: String, mut rx: mpsc::UnboundedReceiver<PipelineJob>) {
        while let Some(job) = rx.recv().await {
            let permit = self.0.permits.clone().acquire_owned().await.expect("semaphore not closed");
            self.run_job(job).await;
            drop(permit);
        }
        debug!("pipeline queue drained"; "service_instance_id" => instance_id);
    }

    async fn run_job(&self, mut job: PipelineJob) {
        while job.cursor < job.steps.len() {
            let name = job.steps[job.cursor];
            let Some(step) = tasks::lookup(name) else {
                error!("unregistered pipeline step"; "step" => name, "operation_id" => job.operation_id);
                self.fail_operation(job.operation_id, name, "no step registered under this name").await;
                return;
            };

            let mut attempt = 0u32;
            let mut backoff = ExponentialBackoff {
                initial_interval: Duration::from_millis(250),
                max_interval: Duration::from_secs(30),
                ..ExponentialBackoff::default()
            };

            loop {
                attempt += 1;
                let mut ctx = (self.0.make_context)().await;
                match step(&mut ctx, job.operation_id).await {
                    Ok(()) => break,
                    Err(TaskError::Permanent(msg)) => {
                        error!("pipeline step failed permanently"; "step" => name, "operation_id" => job.operation_id, "error" => msg);
                        self.fail_operation(job.operation_id, name, &msg).await;
                        return;
                    }
                    Err(TaskError::Transient(msg)) if attempt < self.0.max_attempts => {
                        let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                        warn!("pipeline step will retry"; "step" => name, "operation_id" => job.operation_id, "attempt" => attempt, "error" => msg);
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    Err(TaskError::Transient(msg)) => {
                        error!("pipeline step exhausted its retry budget"; "step" => name, "operation_id" => job.operation_id, "error" => msg);
                        self.fail_operation(job.operation_id, name, &msg).await;
                        return;
                    }
                }
            }
            job.cursor += 1;
        }
        self.succeed_operation(job.operation_id).await;
    }

    async fn succeed_operation(&self, operation_id: i64) {
        let mut ctx = (self.0.make_context)().await;
        let result = ctx
            .db
            .update_operation_state(params::UpdateOperationState {
                operation_id,
                state: OperationState::Succeeded,
                step_description: "all steps completed".to_owned(),
            })
            .await;
        if let Err(e) = result {
            error!("failed to mark operation succeeded"; "operation_id" => operation_id, "error" => e.to_string());
        }
    }

    async fn fail_operation(&self, operation_id: i64, step: &str, message: &str) {
        let mut ctx = (self.0.make_context)().await;
        let result = ctx
            .db
            .update_operation_state(params::UpdateOperationState {
                operation_id,
                state: OperationState::Failed,
                step_description: format!("{step}: {message}"),
            })
            .await;
        if let Err(e) = result {
            error!("failed to mark operation failed"; "operation_id" => operation_id, "error" => e.to_string());
        }
    }
}

#[async_trait]
impl PipelineQueue for PipelineRunner {
    async fn enqueue(&self, instance_id: String, job: PipelineJob) {
        let tx = self.queue_for(&instance_id).await;
        let _ = tx.send(job);
    }
}
