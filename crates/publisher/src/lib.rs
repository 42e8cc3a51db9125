//! Notification Publisher
//!
//! Builds notification events from classified panels and hands them to a
//! transport without blocking the ingest path. Delivery outcomes are logged,
//! never returned as errors.

mod demographics;
mod publish;

pub use demographics::{age_bucket, Demographics, InMemorySubjectDirectory, SubjectDirectory};
pub use publish::{PublishStatus, Publisher, BATCH_KEY, UNASSIGNED_KEY};
