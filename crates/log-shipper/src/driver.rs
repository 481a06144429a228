// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline orchestration.
//!
//! On every lifecycle tick the driver drains the ingest queue into the
//! uploader, counts the invocation and ships the batch when the policy says
//! so. On shutdown it ships whatever is left regardless of the policy, within
//! a bounded grace period.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::constants::ABORT_TIMEOUT;
use crate::errors::UploaderError;
use crate::policy::BatchPolicy;
use crate::queue::IngestQueue;
use crate::uploader::{state::UploadState, FinalizeOutcome, Uploader};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// One upstream invocation completed.
    Invoke,
    /// The host is shutting down. No further ticks follow.
    Shutdown,
}

pub struct PipelineDriver {
    queue: Arc<IngestQueue>,
    policy: BatchPolicy,
    uploader: Uploader,
    shutdown_grace: Duration,
    shipped_batches: u64,
}

impl PipelineDriver {
    #[must_use]
    pub fn new(
        queue: Arc<IngestQueue>,
        policy: BatchPolicy,
        uploader: Uploader,
        shutdown_grace: Duration,
    ) -> Self {
        PipelineDriver {
            queue,
            policy,
            uploader,
            shutdown_grace,
            shipped_batches: 0,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    #[must_use]
    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Batches shipped since startup.
    #[must_use]
    pub fn shipped_batches(&self) -> u64 {
        self.shipped_batches
    }

    /// Moves queued records into the uploader one at a time, in order. Stops
    /// at the first uploader error and leaves the remaining records queued.
    pub async fn drain(&mut self) -> Result<usize, UploaderError> {
        let mut moved = 0;
        while let Some(record) = self.queue.get(1).pop() {
            self.policy.record_drained(record.len());
            self.uploader.push_log(record.as_bytes()).await?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Handles one lifecycle tick. Returns the finalize outcome when the
    /// policy decided to ship.
    ///
    /// A failed ship leaves the policy untouched so the next tick tries again.
    pub async fn on_invoke(&mut self) -> Result<Option<FinalizeOutcome>, UploaderError> {
        if let Err(e) = self.drain().await {
            error!("Failed to move logs into the uploader: {e}");
        }
        self.policy.count_invoke();
        debug!("{}", self.policy);

        if !self.policy.should_ship() {
            return Ok(None);
        }
        match self.uploader.finalize().await {
            Ok(outcome) => {
                self.shipped(&outcome);
                Ok(Some(outcome))
            }
            Err(e) => {
                error!("Failed to ship batch, retrying on the next invocation: {e}");
                Err(e)
            }
        }
    }

    /// Drains and ships everything left, bounded by the shutdown grace
    /// period. When the grace period runs out the open session is aborted and
    /// its content is lost.
    pub async fn shutdown(&mut self) -> Result<FinalizeOutcome, UploaderError> {
        let grace = self.shutdown_grace;
        info!("Shutting down, shipping remaining logs");

        match tokio::time::timeout(grace, self.flush()).await {
            Ok(Ok(outcome)) => {
                self.shipped(&outcome);
                info!("Shipped {} batches in total", self.shipped_batches);
                Ok(outcome)
            }
            Ok(Err(e)) => {
                error!("Final flush failed, remaining logs are lost: {e}");
                Err(e)
            }
            Err(_) => {
                error!("Final flush did not finish within {grace:?}, abandoning upload");
                if tokio::time::timeout(ABORT_TIMEOUT, self.uploader.abort())
                    .await
                    .is_err()
                {
                    error!("Abort did not finish within {ABORT_TIMEOUT:?}");
                }
                Err(UploaderError::ShutdownTimeout(grace))
            }
        }
    }

    /// Handles lifecycle events until shutdown is requested or the sender
    /// goes away, then runs the final flush.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<LifecycleEvent>,
    ) -> Result<FinalizeOutcome, UploaderError> {
        while let Some(event) = events.recv().await {
            match event {
                LifecycleEvent::Invoke => {
                    // Failures are logged and retried on the next tick.
                    let _ = self.on_invoke().await;
                }
                LifecycleEvent::Shutdown => break,
            }
        }
        self.shutdown().await
    }

    /// Drains the whole queue and finalizes. A part failure only loses the
    /// batch it belonged to: records still queued go into a new session. Any
    /// other drain failure stops the drain, and the records it left queued
    /// turn a successful finalize into [`UploaderError::RecordsLeftBehind`].
    async fn flush(&mut self) -> Result<FinalizeOutcome, UploaderError> {
        let mut lost_batch = None;
        while let Err(e) = self.drain().await {
            if *self.uploader.state() == UploadState::Aborted && !self.queue.is_empty() {
                warn!(
                    "Batch lost during shutdown, shipping {} queued records in a new batch: {e}",
                    self.queue.len()
                );
                continue;
            }
            error!("Failed to move logs into the uploader during shutdown: {e}");
            lost_batch = Some(e);
            break;
        }

        let outcome = self.uploader.finalize().await;
        let left = self.queue.len();
        match outcome {
            Ok(outcome) if left > 0 => {
                self.shipped(&outcome);
                Err(UploaderError::RecordsLeftBehind { records: left })
            }
            Ok(FinalizeOutcome::NothingToShip) => match lost_batch {
                Some(e) => Err(e),
                None => Ok(FinalizeOutcome::NothingToShip),
            },
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if left > 0 {
                    warn!("{left} records are still queued and will not be shipped");
                }
                Err(e)
            }
        }
    }

    fn shipped(&mut self, outcome: &FinalizeOutcome) {
        if matches!(outcome, FinalizeOutcome::Shipped { .. }) {
            self.shipped_batches += 1;
        }
        self.policy.reset();
    }
}
