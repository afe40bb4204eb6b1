//! A stage: one processing capability run by a pool of worker threads.

use crate::error::{PipelineError, Result};
use crate::message::Message;
use crate::processors::StageProcessor;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Builds one processor instance per worker.
pub type ProcessorFactory = Arc<dyn Fn() -> Result<Box<dyn StageProcessor>> + Send + Sync>;

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Saw the sentinel and re-emitted it.
    Sentinel,
    /// Input or output channel closed.
    Disconnected,
    /// The processor returned an error or panicked.
    Faulted,
}

/// Per-worker outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker index within the stage.
    pub worker: usize,
    /// Messages handled successfully.
    pub processed: u64,
    /// Why the worker stopped.
    pub exit: WorkerExit,
}

/// Outcome of a stopped stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// Stage name.
    pub name: String,
    /// One entry per worker.
    pub workers: Vec<WorkerReport>,
}

impl StageReport {
    /// Messages handled by all workers.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed).sum()
    }

    /// Workers that ended on a fault.
    #[must_use]
    pub fn faults(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.exit == WorkerExit::Faulted)
            .count()
    }
}

/// Stage definition plus, once started, its running workers.
pub struct Stage {
    name: String,
    workers: usize,
    factory: ProcessorFactory,
    handles: Vec<JoinHandle<WorkerReport>>,
}

impl Stage {
    /// Creates a stage with `workers` threads (at least one).
    pub fn new<F>(name: impl Into<String>, workers: usize, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn StageProcessor>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            workers: workers.max(1),
            factory: Arc::new(factory),
            handles: Vec::new(),
        }
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawns the workers.
    ///
    /// `input_tx` feeds the same channel as `input` and is used to re-emit
    /// the sentinel for sibling workers.
    pub(crate) fn start(
        &mut self,
        input: &Receiver<Message>,
        input_tx: &Sender<Message>,
        output: &Sender<Message>,
    ) -> Result<()> {
        for worker in 0..self.workers {
            let processor = (self.factory)()?;
            let ctx = WorkerContext {
                stage: self.name.clone(),
                worker,
                input: input.clone(),
                resend: input_tx.clone(),
                output: output.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("{}-{worker}", self.name))
                .spawn(move || ctx.run(processor))?;
            self.handles.push(handle);
        }
        debug!("stage '{}' started {} workers", self.name, self.workers);
        Ok(())
    }

    /// Joins the workers and checks that only the sentinel is left on the
    /// input channel.
    pub(crate) fn join(&mut self, input: &Receiver<Message>) -> Result<StageReport> {
        let mut workers = Vec::with_capacity(self.handles.len());
        let mut panicked = None;
        for (worker, handle) in self.handles.drain(..).enumerate() {
            match handle.join() {
                Ok(report) => workers.push(report),
                Err(_) => {
                    error!("stage '{}' worker {worker} thread panicked", self.name);
                    panicked.get_or_insert(worker);
                }
            }
        }
        if let Some(worker) = panicked {
            return Err(PipelineError::WorkerPanicked {
                stage: self.name.clone(),
                worker,
            });
        }

        let leftover: Vec<Message> = input.try_iter().collect();
        let sentinels = leftover.iter().filter(|m| m.is_sentinel()).count();
        if sentinels != 1 || leftover.len() != 1 {
            let kinds: Vec<&str> = leftover.iter().map(Message::kind).collect();
            error!(
                "stage '{}' input not drained after shutdown: {kinds:?}",
                self.name
            );
            return Err(PipelineError::ShutdownProtocol {
                stage: self.name.clone(),
                detail: format!("expected exactly one sentinel, found {kinds:?}"),
            });
        }

        Ok(StageReport {
            name: self.name.clone(),
            workers,
        })
    }
}

struct WorkerContext {
    stage: String,
    worker: usize,
    input: Receiver<Message>,
    resend: Sender<Message>,
    output: Sender<Message>,
}

impl WorkerContext {
    fn run(self, mut processor: Box<dyn StageProcessor>) -> WorkerReport {
        let mut processed = 0;
        let exit = loop {
            let Ok(message) = self.input.recv() else {
                break WorkerExit::Disconnected;
            };

            if message.is_sentinel() {
                let flushed = panic::catch_unwind(AssertUnwindSafe(|| processor.on_shutdown()));
                let exit = match flushed {
                    Ok(Some(out)) => {
                        if self.output.send(out).is_err() {
                            break WorkerExit::Disconnected;
                        }
                        WorkerExit::Sentinel
                    }
                    Ok(None) => WorkerExit::Sentinel,
                    Err(payload) => {
                        error!(
                            "stage '{}' worker {} ({}) panicked in shutdown flush: {}",
                            self.stage,
                            self.worker,
                            processor.name(),
                            panic_message(payload.as_ref())
                        );
                        WorkerExit::Faulted
                    }
                };
                // Siblings sharing the input must see the sentinel too.
                if self.resend.send(Message::Sentinel).is_err() {
                    break WorkerExit::Disconnected;
                }
                break exit;
            }

            let kind = message.kind();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| processor.process(message)));
            match outcome {
                Ok(Ok(Some(out))) => {
                    processed += 1;
                    if self.output.send(out).is_err() {
                        break WorkerExit::Disconnected;
                    }
                }
                Ok(Ok(None)) => processed += 1,
                Ok(Err(err)) => {
                    error!(
                        "stage '{}' worker {} ({}) failed on {kind} message: {err}",
                        self.stage,
                        self.worker,
                        processor.name()
                    );
                    break WorkerExit::Faulted;
                }
                Err(payload) => {
                    error!(
                        "stage '{}' worker {} ({}) panicked on {kind} message: {}",
                        self.stage,
                        self.worker,
                        processor.name(),
                        panic_message(payload.as_ref())
                    );
                    break WorkerExit::Faulted;
                }
            }
        };

        debug!(
            "stage '{}' worker {} exiting ({exit:?}) after {processed} messages",
            self.stage, self.worker
        );
        WorkerReport {
            worker: self.worker,
            processed,
            exit,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
