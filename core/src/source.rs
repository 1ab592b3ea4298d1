//! Consumer transport abstraction.
//!
//! A [`MessageSource`] hands out raw bus messages one at a time. It is driven
//! by a single worker, so every method takes `&mut self`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a message source.
///
/// [`PartitionEof`](SourceError::PartitionEof) and
/// [`UnknownTopic`](SourceError::UnknownTopic) are informational: the consumer
/// logs them and keeps polling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Reached the current end of a partition.
    #[error("Reached end of partition {partition} of '{topic}'")]
    PartitionEof {
        /// Topic name
        topic: String,
        /// Partition index
        partition: i32,
    },

    /// A subscribed topic does not exist (yet).
    #[error("Unknown topic or partition: {0}")]
    UnknownTopic(String),

    /// Any other transport failure.
    #[error("Broker error: {0}")]
    Broker(String),
}

impl SourceError {
    /// Whether the consumer may simply keep polling.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::PartitionEof { .. } | Self::UnknownTopic(_))
    }
}

/// One raw message as received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition index.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Message key (the entity id), if any.
    pub key: Option<Vec<u8>>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Key decoded as UTF-8, lossily.
    #[must_use]
    pub fn key_str(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }
}

/// Pollable source of bus messages with explicit commits.
pub trait MessageSource: Send {
    /// Wait up to `timeout` for the next message.
    ///
    /// `None` means nothing arrived within the timeout.
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Option<Result<InboundMessage, SourceError>>> + Send + '_>>;

    /// Commit the position of every message returned so far.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Broker`] if the commit cannot be issued.
    fn commit(&mut self) -> Result<(), SourceError>;

    /// Commit before shutdown, returning only once the broker has answered.
    ///
    /// Sources whose [`commit`](Self::commit) is already blocking can keep the
    /// default.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Broker`] if the commit is rejected.
    fn commit_final(&mut self) -> Result<(), SourceError> {
        self.commit()
    }

    /// Leave the consumer group and release the connection.
    fn close(&mut self);
}
