// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the transport, the uploader and configuration loading.

use thiserror::Error;

/// Failure reported by a blob-store transport call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The destination already exists and belongs to the caller.
    #[error("destination '{0}' already exists and is owned by you")]
    AlreadyOwnedByYou(String),
    /// The destination exists but belongs to someone else.
    #[error("destination '{0}' already exists")]
    AlreadyExists(String),
    #[error("destination '{0}' does not exist")]
    NoSuchDestination(String),
    #[error("no such upload: {0}")]
    NoSuchUpload(String),
    #[error("invalid part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Catch-all for transports that only carry a message.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Fatal uploader failure, tagged with the stage it happened in.
#[derive(Debug, Error)]
pub enum UploaderError {
    #[error("failed to ensure destination '{bucket}': {source}")]
    EnsureDestination {
        bucket: String,
        #[source]
        source: TransportError,
    },
    #[error("failed to start multipart session for '{key}': {source}")]
    InitSession {
        key: String,
        #[source]
        source: TransportError,
    },
    #[error("part [{part_number}] of upload {upload_id} failed after {attempts} attempts: {source}")]
    UploadPart {
        upload_id: String,
        part_number: u32,
        attempts: u64,
        #[source]
        source: TransportError,
    },
    #[error("failed to complete upload {upload_id}: {source}")]
    Complete {
        upload_id: String,
        #[source]
        source: TransportError,
    },
    #[error("invalid transition: {event} in state {state}")]
    InvalidTransition { state: String, event: String },
    #[error("final flush did not finish within {0:?}")]
    ShutdownTimeout(std::time::Duration),
    /// The final flush ended with records still queued.
    #[error("{records} records were never handed to the uploader")]
    RecordsLeftBehind { records: usize },
}

/// Configuration that cannot be defaulted.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
}
