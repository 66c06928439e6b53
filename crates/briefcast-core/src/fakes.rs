//! In-memory fakes for the engine's external collaborators (testing only)
//!
//! The review queue and buffer pool live in other services in production;
//! these fakes satisfy their trait contracts without any I/O so the gate and
//! resolution paths are testable end to end.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use briefcast_state::RunKey;

use crate::review::{
    BufferPool, FallbackArtifact, ReviewError, ReviewItem, ReviewQueue, ReviewResult,
    ReviewStatus,
};

/// Review queue backed by a `Mutex<BTreeMap<item_id, ReviewItem>>`.
#[derive(Debug, Default)]
pub struct MemoryReviewQueue {
    items: Mutex<BTreeMap<String, ReviewItem>>,
}

impl MemoryReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every item currently on the queue.
    pub fn all(&self) -> Vec<ReviewItem> {
        self.items.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ReviewQueue for MemoryReviewQueue {
    async fn add_to_review_queue(&self, item: ReviewItem) -> ReviewResult<String> {
        let id = item.id.clone();
        let mut items = self.items.lock().unwrap();
        items.insert(id.clone(), item);
        Ok(id)
    }

    async fn get_review_item(&self, id: &str) -> ReviewResult<Option<ReviewItem>> {
        let items = self.items.lock().unwrap();
        Ok(items.get(id).cloned())
    }

    async fn resolve_review_item(
        &self,
        id: &str,
        note: &str,
        resolved_by: &str,
    ) -> ReviewResult<()> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(id)
            .ok_or_else(|| ReviewError::ItemNotFound(id.to_string()))?;
        item.status = ReviewStatus::Resolved;
        item.resolution_note = Some(note.to_string());
        item.resolved_by = Some(resolved_by.to_string());
        item.resolved_at = Some(Utc::now());
        Ok(())
    }
}

/// Buffer pool holding a fixed artifact list and recording deployments.
#[derive(Debug, Default)]
pub struct MemoryBufferPool {
    artifacts: Mutex<Vec<FallbackArtifact>>,
    deployments: Mutex<Vec<(String, String)>>,
    fail_deploys: AtomicBool,
}

impl MemoryBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifacts(artifacts: Vec<FallbackArtifact>) -> Self {
        Self {
            artifacts: Mutex::new(artifacts),
            ..Self::default()
        }
    }

    /// Make every subsequent deployment fail.
    pub fn fail_deploys(&self) {
        self.fail_deploys.store(true, Ordering::SeqCst);
    }

    /// Deployments made so far, as `(artifact_id, run_id)` pairs.
    pub async fn deployed(&self) -> Vec<(String, String)> {
        self.deployments.lock().unwrap().clone()
    }
}

#[async_trait]
impl BufferPool for MemoryBufferPool {
    async fn list_available_fallback_artifacts(&self) -> ReviewResult<Vec<FallbackArtifact>> {
        Ok(self.artifacts.lock().unwrap().clone())
    }

    async fn deploy_fallback_artifact(
        &self,
        artifact_id: &str,
        run_id: &RunKey,
    ) -> ReviewResult<()> {
        if self.fail_deploys.load(Ordering::SeqCst) {
            return Err(ReviewError::Backend(format!(
                "deployment of {artifact_id} refused"
            )));
        }
        let mut artifacts = self.artifacts.lock().unwrap();
        let position = artifacts.iter().position(|a| a.id == artifact_id);
        match position {
            Some(index) => {
                artifacts.remove(index);
                self.deployments
                    .lock()
                    .unwrap()
                    .push((artifact_id.to_string(), run_id.to_string()));
                Ok(())
            }
            None => Err(ReviewError::Backend(format!(
                "artifact {artifact_id} not in buffer"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{Resolution, ReviewResolver};
    use chrono::Utc;
    use std::sync::Arc;

    fn pending_item(id: &str) -> ReviewItem {
        ReviewItem {
            id: id.to_string(),
            run_id: "2026-08-23".to_string(),
            status: ReviewStatus::Pending,
            major_issues: vec![],
            preview_references: vec![],
            resolution_note: None,
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn deploying_removes_the_artifact_from_the_pool() {
        let pool = MemoryBufferPool::with_artifacts(vec![FallbackArtifact {
            id: "buffer-1".to_string(),
            title: "spare".to_string(),
        }]);
        pool.deploy_fallback_artifact("buffer-1", &RunKey::from("2026-08-23"))
            .await
            .unwrap();

        assert!(pool
            .list_available_fallback_artifacts()
            .await
            .unwrap()
            .is_empty());
        assert_eq!(pool.deployed().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_deployment_still_resolves_as_manual_intervention() {
        let queue = Arc::new(MemoryReviewQueue::new());
        queue
            .add_to_review_queue(pending_item("review-1"))
            .await
            .unwrap();

        let pool = Arc::new(MemoryBufferPool::with_artifacts(vec![FallbackArtifact {
            id: "buffer-1".to_string(),
            title: "spare".to_string(),
        }]));
        pool.fail_deploys();

        let resolver = ReviewResolver::new(queue.clone(), pool.clone());
        let resolution = resolver.resolve_reject("review-1", "sam").await.unwrap();
        assert_eq!(resolution, Resolution::ManualInterventionRequired);
        assert!(pool.deployed().await.is_empty());

        let item = queue.get_review_item("review-1").await.unwrap().unwrap();
        assert_eq!(item.status, ReviewStatus::Resolved);
    }
}
