use std::sync::Arc;

use chrono::{DateTime, Utc};

/// One cached value plus the bookkeeping consumers need.
///
/// `loaded` is the only signal that a fetch is needed; an empty collection
/// with `loaded = true` is a real answer.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub data: Arc<T>,
    pub loaded: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            loaded: self.loaded,
            last_fetched_at: self.last_fetched_at,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Entry holding `initial` that has never been fetched.
    pub fn empty(initial: Arc<T>) -> Self {
        Self {
            data: initial,
            loaded: false,
            last_fetched_at: None,
        }
    }

    pub fn loaded(data: T) -> Self {
        Self {
            data: Arc::new(data),
            loaded: true,
            last_fetched_at: Some(Utc::now()),
        }
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.last_fetched_at
            .map(|at| (Utc::now() - at).num_minutes())
    }

    pub fn age_display(&self) -> String {
        let Some(minutes) = self.age_minutes() else {
            return "never".to_string();
        };
        // Hours and days round half up
        match minutes {
            m if m < 1 => "just now".to_string(), // also clock skew
            m if m < 60 => format!("{m}m ago"),
            m if m < 1440 => format!("{}h ago", (m + 30) / 60),
            m => format!("{}d ago", (m + 720) / 1440),
        }
    }
}
