//! Receive buffer for the frame codec

use bytes::{Buf, BytesMut};

use crate::{
    constants::{BUF_CHUNK, MAX_BUFFER_SIZE},
    error::{EslError, EslResult},
};

/// Growable byte buffer that the parser consumes from the front.
///
/// Consumption is O(1) (`BytesMut::advance`); capacity is reclaimed when the
/// buffer is next reserved.
#[derive(Debug)]
pub(crate) struct EslBuffer {
    data: BytesMut,
}

impl EslBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(BUF_CHUNK),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.data
            .len()
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        if self
            .data
            .capacity()
            - self
                .data
                .len()
            < bytes.len()
        {
            self.data
                .reserve(bytes.len().max(BUF_CHUNK));
        }
        self.data
            .extend_from_slice(bytes);
    }

    /// Reject runaway growth; a buffer this large means the peer is not
    /// speaking ESL or framing has desynchronized.
    pub(crate) fn check_size_limits(&self) -> EslResult<()> {
        if self.len() > MAX_BUFFER_SIZE {
            return Err(EslError::decode(format!(
                "receive buffer exceeded {} bytes",
                MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Remove and return the next `\n`-terminated line without its
    /// terminator (a trailing `\r` is stripped as well).
    pub(crate) fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self
            .data
            .iter()
            .position(|&b| b == b'\n')?;
        let mut line = self
            .data
            .split_to(pos)
            .to_vec();
        self.data
            .advance(1);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Remove and return exactly `count` bytes, or `None` if fewer are buffered.
    pub(crate) fn take_bytes(&mut self, count: usize) -> Option<Vec<u8>> {
        if self.len() < count {
            return None;
        }
        Some(
            self.data
                .split_to(count)
                .to_vec(),
        )
    }
}
