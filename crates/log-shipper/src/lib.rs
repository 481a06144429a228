// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log shipping sidecar core.
//!
//! Receives pushed log records over a local HTTP callback, buffers them in a
//! shared queue, decides adaptively when a batch should be shipped and uploads
//! each batch to blob storage through a multipart session.
//!
//! ```text
//!   push callback ──> listener ──> IngestQueue ──> PipelineDriver drain
//!                                                        │
//!                                    BatchPolicy <───────┤
//!                                                        v
//!                                  Uploader (LogBuffer + multipart session)
//!                                                        │
//!                                                        v
//!                                                   BlobStore
//! ```
//!
//! - [`queue`]: thread-safe FIFO shared by the listener and the driver
//! - [`policy`]: size/count/time thresholds deciding when to ship
//! - [`uploader`]: multipart upload state machine with bounded part retries
//! - [`transport`]: the blob-store seam and a filesystem-backed store
//! - [`listener`]: HTTP push endpoint
//! - [`driver`]: lifecycle tick and shutdown orchestration

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod constants;
pub mod driver;
pub mod errors;
pub mod key;
pub mod listener;
pub mod logger;
pub mod policy;
pub mod queue;
pub mod transport;
pub mod uploader;
