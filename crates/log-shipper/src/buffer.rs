// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Byte accumulator owned by the uploader.

use bytes::{Bytes, BytesMut};

#[derive(Debug, Default)]
pub struct LogBuffer {
    bytes: BytesMut,
}

impl LogBuffer {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        LogBuffer {
            bytes: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Removes and returns the first `n` bytes, or everything if fewer are
    /// buffered.
    pub fn consume(&mut self, n: usize) -> Bytes {
        let n = n.min(self.bytes.len());
        self.bytes.split_to(n).freeze()
    }

    /// All buffered bytes, left in place.
    #[must_use]
    pub fn peek(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}
