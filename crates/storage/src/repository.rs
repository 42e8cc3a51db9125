//! Repository Implementation

use crate::StorageError;
use chrono::{DateTime, Utc};
use message_bus::{NotificationEvent, NotificationKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Default number of notifications retained
pub const DEFAULT_RETENTION: usize = 10_000;

/// Notification not yet saved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub panel_id: Option<String>,
    pub subject_id: Option<String>,
    pub region: Option<String>,
    pub state: Option<String>,
    pub demographic_bucket: Option<String>,
    pub sex: Option<String>,
    pub reason: String,
}

impl From<&NotificationEvent> for NewNotification {
    fn from(event: &NotificationEvent) -> Self {
        Self {
            kind: event.kind,
            panel_id: event.panel_id.clone(),
            subject_id: event.subject_id.clone(),
            region: event.region.clone(),
            state: event.state.clone(),
            demographic_bucket: event.demographic_bucket.clone(),
            sex: event.sex.clone(),
            reason: event.reason.clone(),
        }
    }
}

/// Persisted notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub kind: NotificationKind,
    pub panel_id: Option<String>,
    pub subject_id: Option<String>,
    pub region: Option<String>,
    pub state: Option<String>,
    pub demographic_bucket: Option<String>,
    pub sex: Option<String>,
    pub reason: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Notification persistence
pub trait NotificationRepository: Send + Sync {
    /// Save a notification, assigning its id and timestamp
    fn save(&self, notification: NewNotification) -> Result<Notification, StorageError>;

    /// Unread notifications, newest first
    fn find_unread(&self) -> Result<Vec<Notification>, StorageError>;

    /// Mark a notification read. Returns false if the id is unknown.
    fn mark_read(&self, id: i64) -> Result<bool, StorageError>;

    /// Most recent notifications, newest first
    fn find_recent(&self, limit: usize) -> Result<Vec<Notification>, StorageError>;

    fn find_by_region(&self, region: &str) -> Result<Vec<Notification>, StorageError>;

    fn find_by_kind(&self, kind: NotificationKind) -> Result<Vec<Notification>, StorageError>;

    fn count_unread(&self) -> Result<usize, StorageError>;

    fn count(&self) -> Result<usize, StorageError>;
}

/// In-memory repository with a retention bound
pub struct InMemoryNotificationRepository {
    /// Oldest first
    notifications: Mutex<VecDeque<Notification>>,
    /// Max notifications kept
    max_records: usize,
    /// Next notification ID
    next_id: Mutex<i64>,
}

impl InMemoryNotificationRepository {
    /// Create a repository with default retention
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create a repository keeping at most `max_records` notifications
    pub fn with_retention(max_records: usize) -> Self {
        info!("Creating in-memory notification repository (retention {})", max_records);
        Self {
            notifications: Mutex::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records: max_records.max(1),
            next_id: Mutex::new(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Notification>>, StorageError> {
        self.notifications
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
    }

    fn newest_where(
        &self,
        filter: impl Fn(&Notification) -> bool,
    ) -> Result<Vec<Notification>, StorageError> {
        let notifications = self.lock()?;
        Ok(notifications.iter().rev().filter(|n| filter(n)).cloned().collect())
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.clear();
        }
    }
}

impl Default for InMemoryNotificationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRepository for InMemoryNotificationRepository {
    fn save(&self, notification: NewNotification) -> Result<Notification, StorageError> {
        let mut notifications = self.lock()?;

        let mut id = self
            .next_id
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;

        let saved = Notification {
            id: *id,
            kind: notification.kind,
            panel_id: notification.panel_id,
            subject_id: notification.subject_id,
            region: notification.region,
            state: notification.state,
            demographic_bucket: notification.demographic_bucket,
            sex: notification.sex,
            reason: notification.reason,
            read: false,
            created_at: Utc::now(),
        };
        *id += 1;

        // Enforce retention
        while notifications.len() >= self.max_records {
            notifications.pop_front();
        }

        notifications.push_back(saved.clone());
        debug!("Saved {} notification with ID {}", saved.kind, saved.id);

        Ok(saved)
    }

    fn find_unread(&self) -> Result<Vec<Notification>, StorageError> {
        self.newest_where(|n| !n.read)
    }

    fn mark_read(&self, id: i64) -> Result<bool, StorageError> {
        let mut notifications = self.lock()?;
        match notifications.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_recent(&self, limit: usize) -> Result<Vec<Notification>, StorageError> {
        let notifications = self.lock()?;
        Ok(notifications.iter().rev().take(limit).cloned().collect())
    }

    fn find_by_region(&self, region: &str) -> Result<Vec<Notification>, StorageError> {
        self.newest_where(|n| n.region.as_deref() == Some(region))
    }

    fn find_by_kind(&self, kind: NotificationKind) -> Result<Vec<Notification>, StorageError> {
        self.newest_where(|n| n.kind == kind)
    }

    fn count_unread(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.iter().filter(|n| !n.read).count())
    }

    fn count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.len())
    }
}
