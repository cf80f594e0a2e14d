//! Outbound writer — delivers a chunk in full or fails.

use bytes::Bytes;

use quarry_core::wire::MAX_PAYLOAD;

use crate::transport::{ResponseSink, TransportError};

pub struct StreamWriter<K> {
    sink: K,
    max_message: usize,
}

impl<K: ResponseSink> StreamWriter<K> {
    /// `max_message` is clamped to `1..=MAX_PAYLOAD`.
    pub fn new(sink: K, max_message: usize) -> Self {
        Self {
            sink,
            max_message: max_message.clamp(1, MAX_PAYLOAD),
        }
    }

    /// Send `chunk` as one or more data frames, in order.
    /// Returns only once every byte has been handed to the sink.
    pub async fn write(&mut self, mut chunk: Bytes) -> Result<(), TransportError> {
        while !chunk.is_empty() {
            let take = chunk.len().min(self.max_message);
            let frame = chunk.split_to(take);
            self.sink.send_data(frame).await?;
        }
        Ok(())
    }

    pub fn max_message(&self) -> usize {
        self.max_message
    }

    pub fn get_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    pub fn into_inner(self) -> K {
        self.sink
    }
}
