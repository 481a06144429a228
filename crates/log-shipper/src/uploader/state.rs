// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Upload session states and the transition function between them.
//!
//! [`transition`] performs no I/O. The [`Uploader`](super::Uploader) makes the
//! blob-store calls, reports their outcome as an [`UploadEvent`] and carries
//! out the [`Effect`]s handed back.

use crate::errors::UploaderError;
use crate::transport::CompletedPart;

/// An open multipart session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    /// Number the next uploaded part will carry. Starts at 1.
    pub next_part_number: u32,
    /// Append-only, so always in ascending part-number order.
    pub completed_parts: Vec<CompletedPart>,
    pub uploaded_bytes: usize,
}

impl UploadSession {
    #[must_use]
    pub fn new(bucket: String, key: String, upload_id: String) -> Self {
        UploadSession {
            bucket,
            key,
            upload_id,
            next_part_number: 1,
            completed_parts: Vec::new(),
            uploaded_bytes: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadState {
    EnsureDestination,
    InitSession,
    Accumulating(UploadSession),
    /// Terminal success for the current batch.
    Finalized,
    /// Terminal failure for the current batch.
    Aborted,
}

impl UploadState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::EnsureDestination => "EnsureDestination",
            UploadState::InitSession => "InitSession",
            UploadState::Accumulating(_) => "Accumulating",
            UploadState::Finalized => "Finalized",
            UploadState::Aborted => "Aborted",
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&UploadSession> {
        match self {
            UploadState::Accumulating(session) => Some(session),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Finalized | UploadState::Aborted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadEvent {
    /// The destination was created or is already owned by us.
    DestinationReady,
    SessionStarted {
        bucket: String,
        key: String,
        upload_id: String,
    },
    PartUploaded { part: CompletedPart, size: usize },
    /// The store accepted the completion call.
    Completed,
    /// A part upload ran out of attempts or the completion call failed.
    Failed,
    /// Finalize was requested before any content opened a session.
    NothingToShip,
    /// Content arrived after the previous batch ended.
    NewBatch { destination_ready: bool },
}

impl UploadEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            UploadEvent::DestinationReady => "DestinationReady",
            UploadEvent::SessionStarted { .. } => "SessionStarted",
            UploadEvent::PartUploaded { .. } => "PartUploaded",
            UploadEvent::Completed => "Completed",
            UploadEvent::Failed => "Failed",
            UploadEvent::NothingToShip => "NothingToShip",
            UploadEvent::NewBatch { .. } => "NewBatch",
        }
    }
}

/// Side effects the uploader must carry out after a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Best-effort cancel of the given session.
    AbortSession { upload_id: String },
    /// Drop whatever is still buffered.
    DiscardBuffer,
}

fn invalid(state: &UploadState, event: &UploadEvent) -> UploaderError {
    UploaderError::InvalidTransition {
        state: state.name().to_string(),
        event: event.name().to_string(),
    }
}

/// Computes the next state and the effects to run for `event` in `state`.
pub fn transition(
    state: &UploadState,
    event: UploadEvent,
) -> Result<(UploadState, Vec<Effect>), UploaderError> {
    match (state, event) {
        (UploadState::EnsureDestination, UploadEvent::DestinationReady) => {
            Ok((UploadState::InitSession, vec![]))
        }
        (
            UploadState::InitSession,
            UploadEvent::SessionStarted {
                bucket,
                key,
                upload_id,
            },
        ) => Ok((
            UploadState::Accumulating(UploadSession::new(bucket, key, upload_id)),
            vec![],
        )),
        (UploadState::Accumulating(session), UploadEvent::PartUploaded { part, size }) => {
            if part.part_number != session.next_part_number {
                return Err(UploaderError::InvalidTransition {
                    state: format!(
                        "{} (expecting part {})",
                        state.name(),
                        session.next_part_number
                    ),
                    event: format!("PartUploaded (part {})", part.part_number),
                });
            }
            let mut session = session.clone();
            session.next_part_number += 1;
            session.uploaded_bytes += size;
            session.completed_parts.push(part);
            Ok((UploadState::Accumulating(session), vec![]))
        }
        (UploadState::Accumulating(session), UploadEvent::Completed)
            if !session.completed_parts.is_empty() =>
        {
            Ok((UploadState::Finalized, vec![]))
        }
        (UploadState::Accumulating(session), UploadEvent::Failed) => Ok((
            UploadState::Aborted,
            vec![
                Effect::AbortSession {
                    upload_id: session.upload_id.clone(),
                },
                Effect::DiscardBuffer,
            ],
        )),
        (
            UploadState::EnsureDestination | UploadState::InitSession | UploadState::Finalized,
            UploadEvent::NothingToShip,
        ) => Ok((UploadState::Finalized, vec![])),
        (UploadState::Aborted, UploadEvent::NothingToShip) => Ok((UploadState::Aborted, vec![])),
        (
            UploadState::Finalized | UploadState::Aborted,
            UploadEvent::NewBatch { destination_ready },
        ) => {
            let next = if destination_ready {
                UploadState::InitSession
            } else {
                UploadState::EnsureDestination
            };
            Ok((next, vec![]))
        }
        (state, event) => Err(invalid(state, &event)),
    }
}
