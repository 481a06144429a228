// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The blob-store seam used by the uploader.
//!
//! Implementations perform single network (or disk) calls and carry no
//! session state of their own beyond what the store itself keeps. One handle
//! is shared for the whole process lifetime.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::TransportError;

pub mod fs;

pub use fs::FsBlobStore;

/// A part accepted by the store, as listed in the completion call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    /// Integrity tag returned by the store for this part (an ETag).
    pub tag: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Creates the destination. Returns
    /// [`TransportError::AlreadyOwnedByYou`] when it already exists and
    /// belongs to the caller.
    async fn ensure_destination(&self, bucket: &str) -> Result<(), TransportError>;

    /// Starts a multipart session for `key` and returns its upload id.
    async fn init_session(&self, bucket: &str, key: &str) -> Result<String, TransportError>;

    /// Stores one part and returns its integrity tag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, TransportError>;

    /// Assembles the listed parts, in order, into the final object.
    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransportError>;

    /// Discards the session and every part uploaded to it.
    async fn abort_session(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), TransportError>;
}
