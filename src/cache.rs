//! Process-wide classification cache.
//!
//! Keyed by `(content hash, taxonomy version)`. Loaded from the catalog at
//! batch start; new answers accumulate in memory and are written back
//! through the catalog writer by [`ClassificationCache::flush`] at batch
//! end, including after cancellation.

use std::collections::HashMap;

use paperweave_core::response::ModelAnswer;
use tokio::sync::Mutex;

use crate::catalog::{CachedAnswer, Catalog};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<(String, String), ModelAnswer>,
    pending: Vec<CachedAnswer>,
}

#[derive(Debug, Default)]
pub struct ClassificationCache {
    state: Mutex<CacheState>,
}

impl ClassificationCache {
    pub fn empty() -> Self {
        Self::default()
    }

    pub async fn load(catalog: &Catalog) -> Result<Self, StoreError> {
        let mut entries = HashMap::new();
        for entry in catalog.load_classification_cache().await? {
            entries.insert((entry.content_hash, entry.taxonomy_version), entry.answer);
        }
        tracing::debug!(entries = entries.len(), "classification cache loaded");
        Ok(Self {
            state: Mutex::new(CacheState {
                entries,
                pending: Vec::new(),
            }),
        })
    }

    pub async fn get(&self, content_hash: &str, taxonomy_version: &str) -> Option<ModelAnswer> {
        let state = self.state.lock().await;
        state
            .entries
            .get(&(content_hash.to_string(), taxonomy_version.to_string()))
            .cloned()
    }

    pub async fn insert(&self, entry: CachedAnswer) {
        let mut state = self.state.lock().await;
        state.entries.insert(
            (entry.content_hash.clone(), entry.taxonomy_version.clone()),
            entry.answer.clone(),
        );
        state.pending.push(entry);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Writes entries added since the last flush. On failure they stay
    /// queued for the next attempt.
    pub async fn flush(&self, catalog: &Catalog) -> Result<usize, StoreError> {
        let pending = std::mem::take(&mut self.state.lock().await.pending);
        match catalog.store_classification_cache(&pending).await {
            Ok(n) => Ok(n),
            Err(e) => {
                let mut state = self.state.lock().await;
                let newer = std::mem::replace(&mut state.pending, pending);
                state.pending.extend(newer);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::open_temp;

    fn answer(subject: &str) -> ModelAnswer {
        ModelAnswer {
            subject_name: subject.into(),
            confidence: 0.9,
            sub_field: None,
            paper_type: None,
            summary: None,
        }
    }

    #[tokio::test]
    async fn flush_persists_and_reload_sees_entries() {
        let (_dir, catalog) = open_temp().await;
        let cache = ClassificationCache::load(&catalog).await.unwrap();
        assert!(cache.get("h", "v").await.is_none());

        cache
            .insert(CachedAnswer {
                content_hash: "h".into(),
                taxonomy_version: "v".into(),
                answer: answer("Biology"),
            })
            .await;
        assert_eq!(cache.get("h", "v").await, Some(answer("Biology")));
        assert!(cache.get("h", "other").await.is_none());

        assert_eq!(cache.flush(&catalog).await.unwrap(), 1);
        assert_eq!(cache.flush(&catalog).await.unwrap(), 0);

        let reloaded = ClassificationCache::load(&catalog).await.unwrap();
        assert_eq!(reloaded.len().await, 1);
        assert_eq!(reloaded.get("h", "v").await, Some(answer("Biology")));
    }
}
