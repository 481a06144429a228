// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Thread-safe FIFO of pushed log records.
//!
//! The listener is the only producer and the pipeline driver the only
//! consumer. Both hold an `Arc<IngestQueue>`; the queue does its own locking.
//! Record count and cumulative byte size are updated under the same write
//! lock as the underlying sequence, so the two can never disagree.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One opaque unit of ingested log data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record(Bytes);

impl Record {
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Record(payload.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<&str> for Record {
    fn from(value: &str) -> Self {
        Record(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Record {
    fn from(value: Vec<u8>) -> Self {
        Record(Bytes::from(value))
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: VecDeque<Record>,
    byte_size: usize,
}

#[derive(Debug, Default)]
pub struct IngestQueue {
    inner: RwLock<Inner>,
}

impl IngestQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        IngestQueue {
            inner: RwLock::new(Inner {
                records: VecDeque::with_capacity(capacity),
                byte_size: 0,
            }),
        }
    }

    /// Appends a record to the tail of the queue.
    pub fn put(&self, record: Record) {
        let mut inner = self.write();
        inner.byte_size += record.len();
        inner.records.push_back(record);
    }

    /// Appends several records, keeping their order, under a single lock.
    pub fn put_all(&self, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.write();
        for record in records {
            inner.byte_size += record.len();
            inner.records.push_back(record);
        }
    }

    /// Removes up to `n` records from the head. Never waits: an empty queue
    /// yields an empty vector.
    pub fn get(&self, n: usize) -> Vec<Record> {
        let mut inner = self.write();
        let take = n.min(inner.records.len());
        let popped: Vec<Record> = inner.records.drain(..take).collect();
        let popped_bytes: usize = popped.iter().map(Record::len).sum();
        inner.byte_size -= popped_bytes;
        popped
    }

    /// Cumulative byte size of the queued records.
    #[must_use]
    pub fn size(&self) -> usize {
        self.read().byte_size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Critical sections never panic halfway through an update, so a poisoned
    // lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
