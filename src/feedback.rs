//! On-disk feedback log.
//!
//! Holds the two append-only example lists from
//! [`normcheck_core::feedback`] in one JSON file. Writes rewrite the whole
//! file under a mutex.

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::Mutex;

use normcheck_core::feedback::{Feedback, FeedbackDb, FeedbackStats, Polarity};

pub struct FeedbackLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FeedbackLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<FeedbackDb> {
        Ok(crate::json_file::load(&self.path)?.unwrap_or_default())
    }

    /// Store `feedback` about `plan_text`. Ratings outside 1..=5 are
    /// rejected; a neutral rating is accepted but not stored.
    pub async fn record(&self, plan_text: &str, feedback: Feedback) -> Result<Option<Polarity>> {
        let _guard = self.lock.lock().await;
        let mut db = self.read()?;
        let rating = feedback.rating;
        let polarity = db.add(plan_text, feedback, Utc::now())?;
        if polarity.is_some() {
            crate::json_file::save(&self.path, &db)?;
        }
        tracing::info!(rating, ?polarity, "feedback recorded");
        Ok(polarity)
    }

    /// Prompt digest of all stored feedback. Empty when the log is missing
    /// or unreadable.
    pub async fn digest(&self) -> String {
        let _guard = self.lock.lock().await;
        match self.read() {
            Ok(db) => db.digest(),
            Err(e) => {
                tracing::warn!(error = %e, "feedback log unreadable, analysing without it");
                String::new()
            }
        }
    }

    pub async fn stats(&self) -> Result<FeedbackStats> {
        let _guard = self.lock.lock().await;
        Ok(self.read()?.stats())
    }
}
