//! Incremental `application/x-www-form-urlencoded` decoding.
use bytes::{Bytes, BytesMut};

use super::{HttpData, MultipartError, Queue};

/// Decodes attributes progressively: every fragment boundary that lands
/// after a `&` releases the completed pairs before it.
#[derive(Debug)]
pub struct UrlEncodedStream {
    buffer: BytesMut,
    queue: Queue,
    done: bool,
}

impl UrlEncodedStream {
    pub(super) fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            queue: Queue::new(),
            done: false,
        }
    }

    pub(super) fn offer(&mut self, data: &Bytes) -> Result<(), MultipartError> {
        if self.done {
            return Ok(());
        }
        self.buffer.extend_from_slice(data);
        self.drain(false)
    }

    pub(super) fn offer_last(&mut self, data: &Bytes) -> Result<(), MultipartError> {
        if self.done {
            return Ok(());
        }
        self.buffer.extend_from_slice(data);
        self.done = true;
        self.drain(true)
    }

    pub(super) fn has_next(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(super) fn next(&mut self) -> Option<HttpData> {
        self.queue.pop_front()
    }

    pub(super) fn cleanup(&mut self) {
        self.buffer.clear();
        self.queue.clear();
    }

    fn drain(&mut self, all: bool) -> Result<(), MultipartError> {
        let upto = if all {
            self.buffer.len()
        } else {
            match self.buffer.iter().rposition(|&b| b == b'&') {
                Some(amp) => amp + 1,
                None => return Ok(()),
            }
        };
        if upto == 0 {
            return Ok(());
        }
        let segment = self.buffer.split_to(upto);
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&segment)
            .map_err(|err| MultipartError::malformed(err.to_string()))?;
        for (name, value) in pairs {
            self.queue.push_back(HttpData::Attribute { name, value });
        }
        Ok(())
    }
}

// ===== Test =====
