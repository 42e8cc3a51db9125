//! Storage Layer
//!
//! Persists relayed notifications behind a repository trait.

mod repository;

pub use repository::{
    InMemoryNotificationRepository, NewNotification, Notification, NotificationRepository,
    DEFAULT_RETENTION,
};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
