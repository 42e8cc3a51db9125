//! Subject Demographics

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Demographic attributes attached to risk notifications
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub region: Option<String>,
    pub state: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<String>,
}

impl Demographics {
    /// Age bucket label, if the age is known
    pub fn bucket(&self) -> Option<String> {
        self.age.map(|age| age_bucket(age).to_string())
    }
}

/// Age bucket used for aggregation
pub fn age_bucket(age: u32) -> &'static str {
    match age {
        0..=17 => "0-17",
        18..=29 => "18-29",
        30..=44 => "30-44",
        45..=59 => "45-59",
        60..=74 => "60-74",
        _ => "75+",
    }
}

/// Resolves a panel subject to demographics
pub trait SubjectDirectory: Send + Sync {
    fn lookup(&self, subject_id: &str) -> Option<Demographics>;
}

/// Directory backed by a map
#[derive(Default)]
pub struct InMemorySubjectDirectory {
    subjects: RwLock<HashMap<String, Demographics>>,
}

impl InMemorySubjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a subject
    pub fn insert(&self, subject_id: impl Into<String>, demographics: Demographics) {
        self.subjects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subject_id.into(), demographics);
    }

    pub fn len(&self) -> usize {
        self.subjects.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubjectDirectory for InMemorySubjectDirectory {
    fn lookup(&self, subject_id: &str) -> Option<Demographics> {
        self.subjects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(subject_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_buckets() {
        assert_eq!(age_bucket(0), "0-17");
        assert_eq!(age_bucket(17), "0-17");
        assert_eq!(age_bucket(18), "18-29");
        assert_eq!(age_bucket(44), "30-44");
        assert_eq!(age_bucket(45), "45-59");
        assert_eq!(age_bucket(74), "60-74");
        assert_eq!(age_bucket(75), "75+");
        assert_eq!(age_bucket(120), "75+");
    }

    #[test]
    fn test_directory_lookup() {
        let directory = InMemorySubjectDirectory::new();
        directory.insert(
            "123",
            Demographics {
                region: Some("north".into()),
                age: Some(33),
                ..Default::default()
            },
        );

        let found = directory.lookup("123").unwrap();
        assert_eq!(found.bucket().as_deref(), Some("30-44"));
        assert!(directory.lookup("456").is_none());
        assert_eq!(directory.len(), 1);
    }
}
