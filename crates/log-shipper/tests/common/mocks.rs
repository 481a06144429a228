// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory blob store that records every call

use async_trait::async_trait;
use bytes::Bytes;
use log_shipper::{
    errors::TransportError,
    transport::{BlobStore, CompletedPart},
};
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    EnsureDestination,
    InitSession { key: String },
    UploadPart { upload_id: String, part_number: u32, body: Vec<u8> },
    Complete { upload_id: String, parts: Vec<u32> },
    Abort { upload_id: String },
}

/// Blob store double. Calls are recorded in order; failures are injected per
/// stage.
#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<Call>>,
    sessions: Mutex<u32>,
    /// Number of upcoming part uploads that fail.
    failing_parts: Mutex<u64>,
    fail_complete: Mutex<bool>,
    fail_destination: Mutex<bool>,
    fail_init: Mutex<bool>,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_parts(&self, count: u64) {
        *self.failing_parts.lock().unwrap() = count;
    }

    pub fn fail_complete(&self, fail: bool) {
        *self.fail_complete.lock().unwrap() = fail;
    }

    pub fn fail_destination(&self, fail: bool) {
        *self.fail_destination.lock().unwrap() = fail;
    }

    pub fn fail_init(&self, fail: bool) {
        *self.fail_init.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Bodies of the parts that were accepted, with their part numbers.
    pub fn uploaded_parts(&self) -> Vec<(u32, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadPart {
                    part_number, body, ..
                } => Some((part_number, body)),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<Vec<u32>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Complete { parts, .. } => Some(parts),
                _ => None,
            })
            .collect()
    }

    pub fn aborts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Abort { upload_id } => Some(upload_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BlobStore for RecordingStore {
    async fn ensure_destination(&self, bucket: &str) -> Result<(), TransportError> {
        if *self.fail_destination.lock().unwrap() {
            return Err(TransportError::NoSuchDestination(bucket.to_string()));
        }
        self.record(Call::EnsureDestination);
        Ok(())
    }

    async fn init_session(&self, _bucket: &str, key: &str) -> Result<String, TransportError> {
        if *self.fail_init.lock().unwrap() {
            return Err(TransportError::Rejected("injected init failure".to_string()));
        }
        self.record(Call::InitSession {
            key: key.to_string(),
        });
        let mut sessions = self.sessions.lock().unwrap();
        *sessions += 1;
        Ok(format!("upload-{sessions}"))
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, TransportError> {
        {
            let mut failing = self.failing_parts.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(TransportError::Rejected("injected part failure".to_string()));
            }
        }
        self.record(Call::UploadPart {
            upload_id: upload_id.to_string(),
            part_number,
            body: body.to_vec(),
        });
        Ok(format!("etag-{part_number}"))
    }

    async fn complete_session(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransportError> {
        if *self.fail_complete.lock().unwrap() {
            return Err(TransportError::Rejected("injected completion failure".to_string()));
        }
        self.record(Call::Complete {
            upload_id: upload_id.to_string(),
            parts: parts.iter().map(|p| p.part_number).collect(),
        });
        Ok(())
    }

    async fn abort_session(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), TransportError> {
        self.record(Call::Abort {
            upload_id: upload_id.to_string(),
        });
        Ok(())
    }
}
