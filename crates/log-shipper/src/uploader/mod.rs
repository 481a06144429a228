// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Multipart uploader.
//!
//! Log bytes are appended to a [`LogBuffer`]. The first content of a batch
//! makes sure the destination exists and opens a multipart session; from then
//! on every full `part_size` chunk is uploaded as it fills up. `finalize`
//! uploads the remainder as the last part and completes the session.
//!
//! If a part exhausts its retries or the completion call fails, the session is
//! aborted and the batch is dropped. The next pushed content starts a new
//! session with a new key.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::buffer::LogBuffer;
use crate::constants::DEFAULT_PART_SIZE_BYTES;
use crate::errors::{TransportError, UploaderError};
use crate::key::ObjectKeyGenerator;
use crate::transport::{BlobStore, CompletedPart};

pub mod retry;
pub mod state;

use retry::{retry, RetryStrategy};
use state::{transition, Effect, UploadEvent, UploadState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploaderConfig {
    pub bucket: String,
    /// Size of every part but the last.
    pub part_size: usize,
    pub retry_strategy: RetryStrategy,
}

impl UploaderConfig {
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        UploaderConfig {
            bucket: bucket.into(),
            part_size: DEFAULT_PART_SIZE_BYTES,
            retry_strategy: RetryStrategy::default(),
        }
    }
}

/// Result of a successful [`Uploader::finalize`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Shipped {
        key: String,
        parts: usize,
        bytes: usize,
    },
    /// No content was received since the last batch ended.
    NothingToShip,
}

pub struct Uploader {
    store: Arc<dyn BlobStore>,
    keys: ObjectKeyGenerator,
    config: UploaderConfig,
    state: UploadState,
    buffer: LogBuffer,
    destination_ready: bool,
}

impl Uploader {
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, keys: ObjectKeyGenerator, config: UploaderConfig) -> Self {
        let part_size = config.part_size.max(1);
        Uploader {
            store,
            keys,
            buffer: LogBuffer::with_capacity(part_size.saturating_mul(2)),
            config: UploaderConfig { part_size, ..config },
            state: UploadState::EnsureDestination,
            destination_ready: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> &UploadState {
        &self.state
    }

    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Appends `data` to the current batch, opening a session if needed and
    /// uploading every full part.
    ///
    /// Setup failures leave `data` buffered and the state unchanged, so the
    /// next call retries the failed stage. Part failures abort the session.
    pub async fn push_log(&mut self, data: &[u8]) -> Result<(), UploaderError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.state.is_terminal() {
            self.apply(UploadEvent::NewBatch {
                destination_ready: self.destination_ready,
            })
            .await?;
        }

        self.buffer.write(data);
        self.open_session().await?;
        self.upload_full_parts().await
    }

    /// Uploads what is left in the buffer as the final part and completes the
    /// session.
    pub async fn finalize(&mut self) -> Result<FinalizeOutcome, UploaderError> {
        let never_opened = matches!(
            self.state,
            UploadState::EnsureDestination
                | UploadState::InitSession
                | UploadState::Finalized
                | UploadState::Aborted
        );
        if never_opened && self.buffer.is_empty() {
            self.apply(UploadEvent::NothingToShip).await?;
            debug!("No log content received, nothing to ship");
            return Ok(FinalizeOutcome::NothingToShip);
        }

        self.open_session().await?;
        self.upload_full_parts().await?;
        if !self.buffer.is_empty() {
            self.upload_part(self.buffer.len()).await?;
        }

        let Some(session) = self.state.session().cloned() else {
            return Err(UploaderError::InvalidTransition {
                state: self.state.name().to_string(),
                event: UploadEvent::Completed.name().to_string(),
            });
        };

        let completed = self
            .store
            .complete_session(
                &session.bucket,
                &session.key,
                &session.upload_id,
                &session.completed_parts,
            )
            .await;
        if let Err(source) = completed {
            let err = UploaderError::Complete {
                upload_id: session.upload_id.clone(),
                source,
            };
            error!("{err}");
            self.apply(UploadEvent::Failed).await?;
            return Err(err);
        }

        self.apply(UploadEvent::Completed).await?;
        info!(
            "Shipped {} bytes in {} parts to {}/{}",
            session.uploaded_bytes,
            session.completed_parts.len(),
            session.bucket,
            session.key
        );
        Ok(FinalizeOutcome::Shipped {
            key: session.key,
            parts: session.completed_parts.len(),
            bytes: session.uploaded_bytes,
        })
    }

    /// Gives up the current batch. Cancels the open session, if any, and
    /// drops buffered content. Safe to call in any state.
    pub async fn abort(&mut self) {
        if self.state.session().is_some() {
            if let Err(e) = self.apply(UploadEvent::Failed).await {
                error!("Failed to abort upload: {e}");
            }
        } else if !self.buffer.is_empty() {
            warn!(
                "Dropping {} buffered bytes that were never uploaded",
                self.buffer.len()
            );
            self.buffer.clear();
        }
    }

    async fn apply(&mut self, event: UploadEvent) -> Result<(), UploaderError> {
        let (next, effects) = transition(&self.state, event)?;
        let previous = std::mem::replace(&mut self.state, next);
        debug!("Upload state {} -> {}", previous.name(), self.state.name());

        for effect in effects {
            match effect {
                Effect::AbortSession { upload_id } => {
                    if let Some(session) = previous.session() {
                        self.abort_session(&session.bucket, &session.key, &upload_id)
                            .await;
                    }
                }
                Effect::DiscardBuffer => self.buffer.clear(),
            }
        }
        Ok(())
    }

    async fn open_session(&mut self) -> Result<(), UploaderError> {
        if matches!(self.state, UploadState::EnsureDestination) {
            self.ensure_destination().await?;
        }
        if matches!(self.state, UploadState::InitSession) {
            self.init_session().await?;
        }
        Ok(())
    }

    async fn ensure_destination(&mut self) -> Result<(), UploaderError> {
        let bucket = &self.config.bucket;
        match self.store.ensure_destination(bucket).await {
            Ok(()) => debug!("Created destination {bucket}"),
            Err(TransportError::AlreadyOwnedByYou(_)) => {
                debug!("Destination {bucket} already exists and is owned by us");
            }
            Err(source) => {
                let err = UploaderError::EnsureDestination {
                    bucket: bucket.clone(),
                    source,
                };
                error!("{err}");
                return Err(err);
            }
        }
        self.destination_ready = true;
        self.apply(UploadEvent::DestinationReady).await
    }

    async fn init_session(&mut self) -> Result<(), UploaderError> {
        let key = self.keys.next_key();
        match self.store.init_session(&self.config.bucket, &key).await {
            Ok(upload_id) => {
                debug!("Started upload {upload_id} for {key}");
                self.apply(UploadEvent::SessionStarted {
                    bucket: self.config.bucket.clone(),
                    key,
                    upload_id,
                })
                .await
            }
            Err(source) => {
                let err = UploaderError::InitSession { key, source };
                error!("{err}");
                Err(err)
            }
        }
    }

    async fn upload_full_parts(&mut self) -> Result<(), UploaderError> {
        while self.buffer.len() >= self.config.part_size {
            self.upload_part(self.config.part_size).await?;
        }
        Ok(())
    }

    async fn upload_part(&mut self, len: usize) -> Result<(), UploaderError> {
        let Some(session) = self.state.session() else {
            return Err(UploaderError::InvalidTransition {
                state: self.state.name().to_string(),
                event: "PartUploaded".to_string(),
            });
        };
        let bucket = session.bucket.clone();
        let key = session.key.clone();
        let upload_id = session.upload_id.clone();
        let part_number = session.next_part_number;

        let body: Bytes = self.buffer.consume(len);
        let size = body.len();
        let store = &self.store;
        let (bucket, key, id) = (bucket.as_str(), key.as_str(), upload_id.as_str());
        let result = retry(self.config.retry_strategy, move |attempt| {
            let body = body.clone();
            async move {
                let result = store.upload_part(bucket, key, id, part_number, body).await;
                if let Err(e) = &result {
                    warn!("Attempt {attempt} to upload part [{part_number}] of upload {id} failed: {e}");
                }
                result
            }
        })
        .await;

        match result {
            Ok(tag) => {
                debug!("Uploaded part [{part_number}] of upload {upload_id} ({size} bytes)");
                self.apply(UploadEvent::PartUploaded {
                    part: CompletedPart { part_number, tag },
                    size,
                })
                .await
            }
            Err(exhausted) => {
                let err = UploaderError::UploadPart {
                    upload_id,
                    part_number,
                    attempts: exhausted.attempts,
                    source: exhausted.error,
                };
                error!("{err}");
                self.apply(UploadEvent::Failed).await?;
                Err(err)
            }
        }
    }

    async fn abort_session(&self, bucket: &str, key: &str, upload_id: &str) {
        match self.store.abort_session(bucket, key, upload_id).await {
            Ok(()) => info!("Aborted upload {upload_id}"),
            Err(e) => error!("Failed to abort upload {upload_id}: {e}"),
        }
    }
}
