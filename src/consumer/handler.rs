use serde::de::DeserializeOwned;

use crate::bus::ConsumedRecord;

/// A failed business handler. Always treated as transient: the consumer
/// retries it until the retry budget runs out.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Business logic run for each newly seen record.
///
/// The payload is decoded from JSON into [`Self::Event`] before `handle` is
/// called; a payload that does not decode never reaches the handler.
pub trait EventHandler: Send + Sync {
    type Event: DeserializeOwned;

    fn handle(&self, event: Self::Event, record: &ConsumedRecord) -> Result<(), HandlerError>;
}

impl<H: EventHandler + ?Sized> EventHandler for std::sync::Arc<H> {
    type Event = H::Event;

    fn handle(&self, event: Self::Event, record: &ConsumedRecord) -> Result<(), HandlerError> {
        (**self).handle(event, record)
    }
}
