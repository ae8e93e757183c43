//! Dispatch loop that keeps every encoder device busy
//!
//! ```text
//! pending (FIFO) ──issue──> JoinSet (≤ W jobs, one per leased device)
//!        ^                        │ join_next_with_id
//!        └──── retry once ────────┤
//!                                 v
//!                   merge into &mut VectorIndex ── checkpoint every K
//! ```
//!
//! The loop is the only owner of the index, so merges happen one at a time
//! in completion order while jobs keep running on the other devices.

use super::job::{JobError, JobSettings, run_job};
use super::{
    DispatchEvent, FailedContainer, IngestContext, IngestError, IngestReport, container_name,
};
use crate::storage::{self, VectorIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct PendingContainer {
    path: PathBuf,
    name: String,
    attempt: usize,
}

#[derive(Debug)]
struct InFlight {
    container: PendingContainer,
    device: usize,
}

/// Runs containers through the encoder pool into one index.
pub struct Scheduler<'a> {
    ctx: &'a IngestContext,
    index: &'a mut VectorIndex,
    /// Containers fully merged into `index`, persisted with every checkpoint
    ingested: Vec<String>,
    merged_since_checkpoint: usize,
    report: IngestReport,
}

impl<'a> Scheduler<'a> {
    /// `ingested` names the containers already merged into `index`; they are
    /// skipped.
    pub fn new(ctx: &'a IngestContext, index: &'a mut VectorIndex, ingested: Vec<String>) -> Self {
        Self {
            ctx,
            index,
            ingested,
            merged_since_checkpoint: 0,
            report: IngestReport::default(),
        }
    }

    /// Process every container exactly once (plus retries) and merge the results.
    ///
    /// Per-container failures end up in the report; only persistence
    /// failures abort the run.
    pub async fn run(mut self, containers: Vec<PathBuf>) -> Result<IngestReport, IngestError> {
        let done: HashSet<&str> = self.ingested.iter().map(String::as_str).collect();
        let mut pending = VecDeque::with_capacity(containers.len());
        for path in containers {
            let name = container_name(&path);
            if done.contains(name.as_str()) {
                debug!("{} already ingested, skipping", name);
                self.report.containers_skipped += 1;
            } else {
                pending.push_back(PendingContainer {
                    path,
                    name,
                    attempt: 1,
                });
            }
        }
        drop(done);

        let workers = self.ctx.pool().size();
        let settings = JobSettings {
            instruction: Arc::from(self.ctx.options().instruction.as_str()),
            batch_size: self.ctx.options().batch_size,
        };
        info!(
            "Ingesting {} containers on {} device(s)",
            pending.len(),
            workers
        );

        let mut jobs = JoinSet::new();
        let mut in_flight: HashMap<Id, InFlight> = HashMap::new();

        loop {
            while in_flight.len() < workers {
                let Some(next) = pending.pop_front() else {
                    break;
                };
                let lease = self
                    .ctx
                    .devices()
                    .acquire()
                    .await
                    .ok_or(IngestError::DevicePoolClosed)?;
                let device = lease.device_index();
                let encoder = self
                    .ctx
                    .pool()
                    .worker(device)
                    .ok_or(IngestError::Job(JobError::NoWorker(device)))?;

                debug!(
                    "Issuing {} to device {} (attempt {})",
                    next.name, device, next.attempt
                );
                self.report.timeline.push(DispatchEvent::Issued {
                    container: next.name.clone(),
                    device,
                });
                let handle = jobs.spawn(run_job(
                    next.path.clone(),
                    encoder,
                    lease,
                    settings.clone(),
                ));
                in_flight.insert(
                    handle.id(),
                    InFlight {
                        container: next,
                        device,
                    },
                );
                self.report.max_in_flight = self.report.max_in_flight.max(in_flight.len());
            }

            let Some(joined) = jobs.join_next_with_id().await else {
                break;
            };

            let (id, outcome) = match joined {
                Ok((id, completion)) => {
                    let outcome = match completion.result {
                        Ok(batch) => {
                            self.report.records_extracted += batch.records_extracted;
                            self.report.records_skipped += batch.records_skipped;
                            self.index.merge(batch.units).map_err(JobError::from)
                        }
                        Err(e) => Err(e),
                    };
                    // Frees the device for the next issue.
                    drop(completion.lease);
                    (id, outcome)
                }
                Err(join_error) => (join_error.id(), Err(JobError::Task(join_error))),
            };

            let Some(InFlight { container, device }) = in_flight.remove(&id) else {
                error!("Completion for an unknown job, ignoring");
                continue;
            };
            self.report.timeline.push(DispatchEvent::Completed {
                container: container.name.clone(),
                device,
            });

            match outcome {
                Ok(summary) => {
                    debug!(
                        "Merged {}: {} inserted, {} overlapping",
                        container.name, summary.inserted, summary.overlapping
                    );
                    self.report.units_inserted += summary.inserted;
                    self.report.duplicates_skipped += summary.overlapping;
                    self.report.completed.push(container.name.clone());
                    self.ingested.push(container.name);
                    self.merged_since_checkpoint += 1;
                    if self.merged_since_checkpoint >= self.ctx.options().checkpoint_every {
                        self.checkpoint()?;
                    }
                }
                Err(e) if container.attempt < self.ctx.options().max_attempts => {
                    warn!(
                        "{} failed on device {} (attempt {}): {}, retrying",
                        container.name, device, container.attempt, e
                    );
                    pending.push_back(PendingContainer {
                        attempt: container.attempt + 1,
                        ..container
                    });
                }
                Err(e) => {
                    error!(
                        "{} failed after {} attempt(s): {}",
                        container.name, container.attempt, e
                    );
                    self.report.failed.push(FailedContainer {
                        container: container.name,
                        attempts: container.attempt,
                        cause: e.to_string(),
                    });
                }
            }
        }

        self.checkpoint()?;
        self.report.ingested_containers = self.ingested;

        info!(
            "Ingest finished: {} containers merged, {} failed, {} units inserted, {} duplicates skipped",
            self.report.completed.len(),
            self.report.failed.len(),
            self.report.units_inserted,
            self.report.duplicates_skipped
        );
        Ok(self.report)
    }

    /// Persist the index if the run has an index directory.
    fn checkpoint(&mut self) -> Result<(), IngestError> {
        self.merged_since_checkpoint = 0;
        let Some(dir) = &self.ctx.options().index_dir else {
            return Ok(());
        };
        let index = &*self.index;
        let fingerprint = self.ctx.options().encoder_fingerprint.as_deref();
        let ingested = &self.ingested;
        blocking(|| storage::save(index, dir, fingerprint, ingested))?;
        self.report.checkpoints += 1;
        Ok(())
    }
}

/// Run file-heavy work without stalling the other tasks of a multi-threaded
/// runtime. A current-thread runtime has nowhere to move them, so the work
/// runs inline there.
fn blocking<T>(work: impl FnOnce() -> T) -> T {
    match Handle::current().runtime_flavor() {
        RuntimeFlavor::MultiThread => tokio::task::block_in_place(work),
        _ => work(),
    }
}
