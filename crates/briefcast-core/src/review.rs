//! Human-review escalation and its resolution paths.
//!
//! When the publish gate escalates, a [`ReviewItem`] carrying only the major
//! issues and preview references lands on an external review queue. An
//! operator later approves (publication proceeds) or rejects; rejection
//! substitutes a pre-vetted fallback artifact from a bounded buffer pool.
//! The reject path never silently publishes unreviewed content: when no
//! substitute can be deployed, the resolution is flagged for manual
//! intervention instead.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use briefcast_state::{DecisionRecord, IssueSeverity, QualityIssue, RunDocument, RunKey};

use crate::stage::Stage;

/// Errors from the review queue and buffer pool collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("review item not found: {0}")]
    ItemNotFound(String),

    #[error("review item already resolved: {0}")]
    AlreadyResolved(String),

    #[error("review backend error: {0}")]
    Backend(String),
}

pub type ReviewResult<T> = std::result::Result<T, ReviewError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Resolved,
}

/// A reviewable work item, created only on gate escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: String,
    pub run_id: String,
    pub status: ReviewStatus,
    /// Only major issues reach the reviewer; minors stay in the decision.
    pub major_issues: Vec<QualityIssue>,
    /// Links the reviewer can open to judge the content.
    pub preview_references: Vec<String>,
    pub resolution_note: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// External review-management collaborator.
#[async_trait]
pub trait ReviewQueue: Send + Sync {
    async fn add_to_review_queue(&self, item: ReviewItem) -> ReviewResult<String>;
    async fn get_review_item(&self, id: &str) -> ReviewResult<Option<ReviewItem>>;
    /// Mark the item resolved, recording the note, the resolver, and the
    /// resolution time.
    async fn resolve_review_item(
        &self,
        id: &str,
        note: &str,
        resolved_by: &str,
    ) -> ReviewResult<()>;
}

/// A pre-approved substitute episode held in the content buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackArtifact {
    pub id: String,
    pub title: String,
}

/// External content-buffer collaborator, consumed only by the reject path.
#[async_trait]
pub trait BufferPool: Send + Sync {
    async fn list_available_fallback_artifacts(&self) -> ReviewResult<Vec<FallbackArtifact>>;
    async fn deploy_fallback_artifact(&self, artifact_id: &str, run_id: &RunKey)
        -> ReviewResult<()>;
}

/// What the caller should do after a review item is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Approved: proceed with publication of the run's own content.
    Proceed,
    /// Rejected: a pre-vetted substitute was deployed in its place.
    FallbackDeployed { artifact_id: String },
    /// Rejected and no substitute could be deployed. Nothing was published;
    /// an operator must intervene manually.
    ManualInterventionRequired,
}

/// Build and enqueue the review item for an escalated run.
///
/// Carries only the decision's major issues plus preview references pulled
/// from the rendering and publishing outputs.
pub async fn create_review_item(
    queue: &dyn ReviewQueue,
    run_id: &RunKey,
    record: &DecisionRecord,
    run: &RunDocument,
) -> ReviewResult<String> {
    let major_issues: Vec<QualityIssue> = record
        .issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Major)
        .cloned()
        .collect();

    let item = ReviewItem {
        id: format!("review-{}", Uuid::new_v4()),
        run_id: run_id.to_string(),
        status: ReviewStatus::Pending,
        major_issues,
        preview_references: preview_references(run),
        resolution_note: None,
        resolved_by: None,
        created_at: Utc::now(),
        resolved_at: None,
    };
    queue.add_to_review_queue(item).await
}

fn preview_references(run: &RunDocument) -> Vec<String> {
    let mut refs = Vec::new();
    for stage in [Stage::Rendering, Stage::Publishing] {
        let Some(output) = run.outputs.get(stage.name()) else {
            continue;
        };
        for field in ["preview_url", "artifact_url"] {
            if let Some(url) = output.get(field).and_then(|v| v.as_str()) {
                refs.push(url.to_string());
            }
        }
    }
    refs
}

/// Resolution paths for pending review items.
pub struct ReviewResolver {
    queue: Arc<dyn ReviewQueue>,
    pool: Arc<dyn BufferPool>,
}

impl ReviewResolver {
    pub fn new(queue: Arc<dyn ReviewQueue>, pool: Arc<dyn BufferPool>) -> Self {
        Self { queue, pool }
    }

    async fn pending_item(&self, item_id: &str) -> ReviewResult<ReviewItem> {
        let item = self
            .queue
            .get_review_item(item_id)
            .await?
            .ok_or_else(|| ReviewError::ItemNotFound(item_id.to_string()))?;
        if item.status == ReviewStatus::Resolved {
            return Err(ReviewError::AlreadyResolved(item_id.to_string()));
        }
        Ok(item)
    }

    /// Approve: mark resolved and signal the caller to publish.
    pub async fn resolve_approve(
        &self,
        item_id: &str,
        resolved_by: &str,
    ) -> ReviewResult<Resolution> {
        let item = self.pending_item(item_id).await?;
        self.queue
            .resolve_review_item(item_id, "approved for publication", resolved_by)
            .await?;
        info!(item_id, run_id = %item.run_id, resolved_by, "review approved");
        Ok(Resolution::Proceed)
    }

    /// Reject: mark resolved and substitute a buffered fallback episode.
    ///
    /// When the pool is empty or deployment fails, the item is still
    /// resolved but flagged critical so an operator intervenes. The run's
    /// own content is never published on this path.
    pub async fn resolve_reject(
        &self,
        item_id: &str,
        resolved_by: &str,
    ) -> ReviewResult<Resolution> {
        let item = self.pending_item(item_id).await?;
        let run_id = RunKey::from(item.run_id.as_str());

        let deployed = match self.pool.list_available_fallback_artifacts().await {
            Ok(artifacts) => match artifacts.first() {
                Some(artifact) => {
                    match self
                        .pool
                        .deploy_fallback_artifact(&artifact.id, &run_id)
                        .await
                    {
                        Ok(()) => Some(artifact.id.clone()),
                        Err(err) => {
                            error!(item_id, run_id = %run_id, artifact_id = %artifact.id,
                                error = %err, "fallback artifact deployment failed");
                            None
                        }
                    }
                }
                None => {
                    error!(item_id, run_id = %run_id,
                        "content buffer is empty, no fallback artifact available");
                    None
                }
            },
            Err(err) => {
                error!(item_id, run_id = %run_id, error = %err,
                    "could not list fallback artifacts");
                None
            }
        };

        match deployed {
            Some(artifact_id) => {
                self.queue
                    .resolve_review_item(
                        item_id,
                        &format!("rejected; fallback artifact {artifact_id} deployed"),
                        resolved_by,
                    )
                    .await?;
                info!(item_id, run_id = %run_id, artifact_id = %artifact_id,
                    "review rejected, fallback deployed");
                Ok(Resolution::FallbackDeployed { artifact_id })
            }
            None => {
                self.queue
                    .resolve_review_item(
                        item_id,
                        "rejected; CRITICAL: no fallback deployed, manual intervention required",
                        resolved_by,
                    )
                    .await?;
                Ok(Resolution::ManualInterventionRequired)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryBufferPool, MemoryReviewQueue};
    use briefcast_state::{GateMetrics, PublishDecision};
    use serde_json::json;

    fn escalated_record() -> DecisionRecord {
        DecisionRecord {
            decision: PublishDecision::HumanReview,
            issues: vec![
                QualityIssue {
                    code: "SOURCE_LOSS_HIGH".to_string(),
                    severity: IssueSeverity::Major,
                    stage: "sourcing".to_string(),
                    message: "6 of 10 sources failed".to_string(),
                },
                QualityIssue {
                    code: "WRITING_FALLBACK".to_string(),
                    severity: IssueSeverity::Minor,
                    stage: "writing".to_string(),
                    message: "script from fallback".to_string(),
                },
            ],
            reasons: vec![],
            metrics: GateMetrics::default(),
            decided_at: Utc::now(),
        }
    }

    fn run_with_preview() -> RunDocument {
        let mut run = RunDocument::new(&RunKey::from("2026-08-23"), Utc::now());
        run.outputs.insert(
            "rendering".to_string(),
            json!({"preview_url": "https://cdn/preview.mp4", "duration_secs": 300}),
        );
        run
    }

    #[tokio::test]
    async fn review_item_carries_only_majors_and_previews() {
        let queue = MemoryReviewQueue::default();
        let id = create_review_item(
            &queue,
            &RunKey::from("2026-08-23"),
            &escalated_record(),
            &run_with_preview(),
        )
        .await
        .unwrap();

        let item = queue.get_review_item(&id).await.unwrap().unwrap();
        assert_eq!(item.status, ReviewStatus::Pending);
        assert!(item.resolved_at.is_none());
        assert_eq!(item.major_issues.len(), 1);
        assert_eq!(item.major_issues[0].code, "SOURCE_LOSS_HIGH");
        assert_eq!(
            item.preview_references,
            vec!["https://cdn/preview.mp4".to_string()]
        );
    }

    #[tokio::test]
    async fn approve_resolves_and_proceeds() {
        let queue = Arc::new(MemoryReviewQueue::default());
        let id = create_review_item(
            queue.as_ref(),
            &RunKey::from("2026-08-23"),
            &escalated_record(),
            &run_with_preview(),
        )
        .await
        .unwrap();

        let resolver = ReviewResolver::new(queue.clone(), Arc::new(MemoryBufferPool::default()));
        let resolution = resolver.resolve_approve(&id, "sam").await.unwrap();
        assert_eq!(resolution, Resolution::Proceed);

        let item = queue.get_review_item(&id).await.unwrap().unwrap();
        assert_eq!(item.status, ReviewStatus::Resolved);
        assert_eq!(item.resolved_by.as_deref(), Some("sam"));
        assert!(item.resolved_at.unwrap() >= item.created_at);

        // a second resolution attempt is refused
        let err = resolver.resolve_approve(&id, "sam").await.unwrap_err();
        assert!(matches!(err, ReviewError::AlreadyResolved(_)));
    }

    #[tokio::test]
    async fn reject_deploys_first_buffered_artifact() {
        let queue = Arc::new(MemoryReviewQueue::default());
        let pool = Arc::new(MemoryBufferPool::with_artifacts(vec![
            FallbackArtifact {
                id: "buffer-7".to_string(),
                title: "evergreen episode".to_string(),
            },
            FallbackArtifact {
                id: "buffer-8".to_string(),
                title: "spare".to_string(),
            },
        ]));
        let id = create_review_item(
            queue.as_ref(),
            &RunKey::from("2026-08-23"),
            &escalated_record(),
            &run_with_preview(),
        )
        .await
        .unwrap();

        let resolver = ReviewResolver::new(queue.clone(), pool.clone());
        let resolution = resolver.resolve_reject(&id, "sam").await.unwrap();
        assert_eq!(
            resolution,
            Resolution::FallbackDeployed {
                artifact_id: "buffer-7".to_string()
            }
        );
        assert_eq!(
            pool.deployed().await,
            vec![("buffer-7".to_string(), "2026-08-23".to_string())]
        );
    }

    #[tokio::test]
    async fn reject_with_empty_pool_flags_manual_intervention() {
        let queue = Arc::new(MemoryReviewQueue::default());
        let id = create_review_item(
            queue.as_ref(),
            &RunKey::from("2026-08-23"),
            &escalated_record(),
            &run_with_preview(),
        )
        .await
        .unwrap();

        let resolver = ReviewResolver::new(queue.clone(), Arc::new(MemoryBufferPool::default()));
        let resolution = resolver.resolve_reject(&id, "sam").await.unwrap();
        assert_eq!(resolution, Resolution::ManualInterventionRequired);

        // still resolved, with the critical note
        let item = queue.get_review_item(&id).await.unwrap().unwrap();
        assert_eq!(item.status, ReviewStatus::Resolved);
        assert!(item
            .resolution_note
            .as_deref()
            .unwrap()
            .contains("CRITICAL"));
    }

    #[tokio::test]
    async fn unknown_item_is_an_error() {
        let resolver = ReviewResolver::new(
            Arc::new(MemoryReviewQueue::default()),
            Arc::new(MemoryBufferPool::default()),
        );
        let err = resolver.resolve_approve("review-missing", "sam").await;
        assert!(matches!(err, Err(ReviewError::ItemNotFound(_))));
    }
}
