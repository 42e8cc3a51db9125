//! Dead Letter Handling

use message_bus::Envelope;
use storage::StorageError;
use tracing::error;

/// Receives envelopes that exhausted their retries
pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, envelope: &Envelope, attempts: u32, error: &StorageError);
}

/// Logs and drops
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDeadLetterSink;

impl DeadLetterSink for LoggingDeadLetterSink {
    fn dead_letter(&self, envelope: &Envelope, attempts: u32, error: &StorageError) {
        error!(
            "Dead-lettered {} event {} (partition {}, offset {}) after {} attempts: {}",
            envelope.event.kind,
            envelope.event.event_id,
            envelope.partition,
            envelope.offset,
            attempts,
            error
        );
    }
}
